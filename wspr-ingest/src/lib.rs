pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod module;
pub mod status;
