//! Unit repository: rows of the `generated_units` table.

use rusqlite::{params, Connection, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::model::{ApprovalStatus, GeneratedUnit};

/// A raw unit row from the database.
#[derive(Debug, Clone)]
pub struct UnitRow {
    pub id: String,
    pub job_id: String,
    pub variation_index: u32,
    pub media_type: String,
    pub mime_type: String,
    pub original_path: String,
    pub thumbnail_path: Option<String>,
    pub preview_path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub file_size: i64,
    pub approval_status: String,
    pub created_at: String,
}

impl UnitRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            variation_index: row.get("variation_index")?,
            media_type: row.get("media_type")?,
            mime_type: row.get("mime_type")?,
            original_path: row.get("original_path")?,
            thumbnail_path: row.get("thumbnail_path")?,
            preview_path: row.get("preview_path")?,
            width: row.get("width")?,
            height: row.get("height")?,
            duration_seconds: row.get("duration_seconds")?,
            file_size: row.get("file_size")?,
            approval_status: row.get("approval_status")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn from_unit(unit: &GeneratedUnit) -> Self {
        Self {
            id: unit.id.clone(),
            job_id: unit.job_id.clone(),
            variation_index: unit.variation_index,
            media_type: unit.media_type.as_str().to_string(),
            mime_type: unit.mime_type.clone(),
            original_path: unit.original_path.clone(),
            thumbnail_path: unit.thumbnail_path.clone(),
            preview_path: unit.preview_path.clone(),
            width: unit.width,
            height: unit.height,
            duration_seconds: unit.duration_seconds,
            file_size: i64::try_from(unit.file_size).unwrap_or(i64::MAX),
            approval_status: unit.approval_status.as_str().to_string(),
            created_at: format_timestamp(&unit.created_at),
        }
    }

    pub fn into_unit(self) -> Result<GeneratedUnit, DatabaseError> {
        Ok(GeneratedUnit {
            media_type: self
                .media_type
                .parse()
                .map_err(|reason| DatabaseError::InvalidRow {
                    column: "media_type",
                    reason,
                })?,
            approval_status: self.approval_status.parse::<ApprovalStatus>().map_err(
                |reason| DatabaseError::InvalidRow {
                    column: "approval_status",
                    reason,
                },
            )?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            id: self.id,
            job_id: self.job_id,
            variation_index: self.variation_index,
            mime_type: self.mime_type,
            original_path: self.original_path,
            thumbnail_path: self.thumbnail_path,
            preview_path: self.preview_path,
            width: self.width,
            height: self.height,
            duration_seconds: self.duration_seconds,
            file_size: u64::try_from(self.file_size).unwrap_or(0),
        })
    }
}

/// Inserts a unit unless one already exists for `(job_id, variation_index)`.
/// Returns `false` when the index was already taken.
pub fn insert_if_absent(conn: &Connection, unit: &UnitRow) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT INTO generated_units (id, job_id, variation_index, media_type, mime_type,
         original_path, thumbnail_path, preview_path, width, height, duration_seconds,
         file_size, approval_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT (job_id, variation_index) DO NOTHING",
        params![
            unit.id,
            unit.job_id,
            unit.variation_index,
            unit.media_type,
            unit.mime_type,
            unit.original_path,
            unit.thumbnail_path,
            unit.preview_path,
            unit.width,
            unit.height,
            unit.duration_seconds,
            unit.file_size,
            unit.approval_status,
            unit.created_at,
        ],
    )?;
    Ok(changed == 1)
}

/// Whether a unit with this id is already stored.
pub fn exists(conn: &Connection, unit_id: &str) -> Result<bool, DatabaseError> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM generated_units WHERE id = ?1)",
        params![unit_id],
        |r| r.get(0),
    )?;
    Ok(found == 1)
}

/// Lists a job's units ordered by variation index.
pub fn list_by_job(db: &Database, job_id: &str) -> Result<Vec<UnitRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM generated_units WHERE job_id = ?1 ORDER BY variation_index ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], UnitRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn variation_indices(db: &Database, job_id: &str) -> Result<Vec<u32>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT variation_index FROM generated_units WHERE job_id = ?1
             ORDER BY variation_index ASC",
        )?;
        let indices = stmt
            .query_map(params![job_id], |r| r.get(0))?
            .collect::<Result<Vec<u32>, _>>()?;
        Ok(indices)
    })
}

/// Deletes every unit of a job, returning the object paths they referenced.
pub fn delete_for_job(conn: &Connection, job_id: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT original_path, thumbnail_path, preview_path FROM generated_units WHERE job_id = ?1",
    )?;
    let mut paths = Vec::new();
    let rows = stmt.query_map(params![job_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, Option<String>>(1)?,
            r.get::<_, Option<String>>(2)?,
        ))
    })?;
    for row in rows {
        let (original, thumbnail, preview) = row?;
        paths.push(original);
        paths.extend(thumbnail);
        paths.extend(preview);
    }
    conn.execute(
        "DELETE FROM generated_units WHERE job_id = ?1",
        params![job_id],
    )?;
    Ok(paths)
}
