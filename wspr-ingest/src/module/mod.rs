pub mod clock;
pub mod decoder;
pub mod dxcc;
pub mod job;
pub mod manager;
pub mod publisher;
pub mod recorder;
