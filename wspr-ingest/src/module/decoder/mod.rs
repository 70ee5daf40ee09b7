//! WSPR decoder integration
//!
//! Runs the external decoder binary against a captured cycle and parses
//! the spot listing it leaves behind.

pub mod parser;
pub mod runner;

pub use parser::{SPOTS_FILE, parse_spot_line, parse_spots, read_spots_file};
pub use runner::{DecoderCommand, DecoderOutcome, decoder_args};
