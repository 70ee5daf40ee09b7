//! Shared WSPR domain types.
//!
//! Pure data and arithmetic used by the ingest service: cycle-boundary
//! math, the amateur band table, decoded spots and the JSON message that
//! goes out to the broker. Nothing in here touches the network or the
//! filesystem.

pub mod band;
pub mod cycle;
pub mod spot;

pub use band::band_label;
pub use cycle::{CYCLE_MINUTES, decoder_filename, is_boundary, next_boundary, recording_filename};
pub use spot::{DxccInfo, EnrichedSpot, Spot, SpotMessage, spot_topic};
