//! Domain records shared by the repository, the worker and the HTTP layer.

pub mod job;
pub mod unit;

pub use job::{GenerationJob, JobCounters, JobStatus, MediaType, UnitParameters};
pub use unit::{ApprovalStatus, GeneratedUnit};
