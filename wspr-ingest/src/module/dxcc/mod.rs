//! DXCC entity lookup
//!
//! Resolves callsigns to DXCC entities from a CTY.DAT prefix file.
//! The table is loaded once at startup and shared read-only by all jobs.

mod types;
pub use types::{Entity, PrefixOverride};

mod parser;
pub use parser::parse_cty;

mod table;
pub use table::DxccTable;
