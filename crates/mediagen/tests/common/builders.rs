//! Builders for jobs and image fixtures.

#![allow(dead_code)]

use std::io::Cursor;

use chrono::{Duration, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use mediagen::model::{GenerationJob, JobStatus, MediaType, UnitParameters};

/// Encodes a gradient PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * 7 + y * 3) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode png");
    buf
}

/// Builder for `GenerationJob` instances.
pub struct JobBuilder {
    job: GenerationJob,
}

impl JobBuilder {
    pub fn image(variations: u32) -> Self {
        Self {
            job: GenerationJob::new(
                "product-1",
                MediaType::Image,
                "Studio photo of a ceramic mug on a walnut table",
                variations,
            ),
        }
    }

    pub fn video(variations: u32) -> Self {
        Self {
            job: GenerationJob::new(
                "product-1",
                MediaType::Video,
                "Slow turntable shot of a ceramic mug",
                variations,
            ),
        }
    }

    pub fn prompt(mut self, prompt: &str) -> Self {
        self.job.prompt = prompt.to_string();
        self
    }

    pub fn aspect_ratio(mut self, ratio: &str) -> Self {
        self.job.parameters.aspect_ratio = Some(ratio.to_string());
        self
    }

    pub fn parameters(mut self, parameters: UnitParameters) -> Self {
        self.job.parameters = parameters;
        self
    }

    pub fn reference(mut self, path: &str) -> Self {
        self.job.reference_paths.push(path.to_string());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn counts(mut self, completed: u32, failed: u32) -> Self {
        self.job.completed_count = completed;
        self.job.failed_count = failed;
        self
    }

    /// Shifts `created_at` into the past.
    pub fn age_secs(mut self, secs: i64) -> Self {
        self.job.created_at = Utc::now() - Duration::seconds(secs);
        self.job.updated_at = self.job.created_at;
        self
    }

    pub fn build(self) -> GenerationJob {
        self.job
    }
}
