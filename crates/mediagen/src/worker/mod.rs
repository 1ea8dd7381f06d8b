//! The job worker: claims generation jobs, fans units out to providers
//! under a concurrency cap and persists results incrementally.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod progress;
pub mod request;
pub mod runner;
mod unit;

pub use config::{RunOptions, TerminalPolicy, WorkerSettings};
pub use dispatcher::{DispatchTicket, JobDispatcher};
pub use error::WorkerError;
pub use outcome::{JobOutcome, OutcomeKind};
pub use progress::{LogProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use request::RequestTemplate;
pub use runner::JobWorker;
