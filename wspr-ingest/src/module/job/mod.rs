//! Per-band record → decode → publish pipeline
//!
//! A [`JobRunner`] owns one band's work directory and drives a loop that
//! aligns to every WSPR cycle boundary, captures the cycle and hands the
//! audio to a serialized decode worker.

mod files;
pub use files::{is_job_audio, purge_audio};

mod state;
pub use state::{CycleTiming, JobStatus, RecordingState};

mod decode;
pub use decode::DecodeRequest;

mod runner;
pub use runner::{JobDeps, JobRunner, JobSettings};
#[cfg(test)]
pub(crate) use runner::tests as test_support;
