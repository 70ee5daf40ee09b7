//! Fleet coordination
//!
//! The [`Manager`] owns every band's [`JobRunner`](crate::module::job::JobRunner)
//! and the shared publisher, and applies configuration reloads as a diff
//! keyed on band name.

mod barrier;
pub use barrier::OneShotBarrier;

mod status;
pub use status::{BandState, BandStatus};

mod coordinator;
pub use coordinator::Manager;
