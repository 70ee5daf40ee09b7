//! Decoder spot listing parser
//!
//! Lines look like
//!
//! ```text
//! 251227 1000   1 -15  0.5  14.097100  W1ABC        FN42 30
//! 251227 1000   2 -24 -1.1  14.097054  <K1XYZ/P>    37
//! ```
//!
//! i.e. `YYMMDD HHMM Seq SNR DT Freq Callsign [Locator] Power [extra...]`.

use anyhow::{Context, Result, anyhow};
use chrono::{TimeZone, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;
use wspr_common::{Spot, is_boundary};

/// Output file the decoder writes into its working directory.
pub const SPOTS_FILE: &str = "wspr_spots.txt";

static LINE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{2})(\d{2})(\d{2})\s+(\d{2})(\d{2})\s+\S+\s+(-?\d+)\s+(-?[\d.]+)\s+([\d.]+)\s+(\S+)\s*(.*)$",
    )
    .ok()
});

/// Whether `token` can be a Maidenhead locator: field letter A..R first,
/// at least two characters.
fn looks_like_locator(token: &str) -> bool {
    token.len() >= 2 && matches!(token.chars().next(), Some('A'..='R'))
}

/// Parse one listing line.
///
/// `Ok(None)` for blank lines, status markers and placeholder callsigns;
/// `Err` for anything malformed.
pub fn parse_spot_line(line: &str) -> Result<Option<Spot>> {
    let line = line.trim();
    if line.is_empty() || line.contains("<DecodeFinished>") {
        return Ok(None);
    }

    let caps = LINE_RE
        .as_ref()
        .ok_or_else(|| anyhow!("spot line regex failed to compile"))?
        .captures(line)
        .ok_or_else(|| anyhow!("unrecognised line layout"))?;
    let field = |i: usize| caps.get(i).map_or("", |m| m.as_str());

    let raw_call = field(9);
    if raw_call == "<...>" {
        return Ok(None);
    }

    let num = |i: usize| -> Result<u32> {
        field(i).parse().with_context(|| format!("bad number '{}'", field(i)))
    };
    let cycle_timestamp = Utc
        .with_ymd_and_hms(2000 + num(1)? as i32, num(2)?, num(3)?, num(4)?, num(5)?, 0)
        .single()
        .ok_or_else(|| {
            anyhow!("invalid date/time '{}{}{} {}{}'", field(1), field(2), field(3), field(4), field(5))
        })?;
    if !is_boundary(cycle_timestamp) {
        return Err(anyhow!("timestamp {} is not on a cycle boundary", cycle_timestamp));
    }

    let snr_db: i32 = field(6).parse().with_context(|| format!("bad SNR '{}'", field(6)))?;
    let time_offset_s: f64 = field(7).parse().with_context(|| format!("bad DT '{}'", field(7)))?;
    let frequency_mhz: f64 = field(8).parse().with_context(|| format!("bad frequency '{}'", field(8)))?;

    let callsign = raw_call.trim_start_matches('<').trim_end_matches('>').to_string();
    if callsign.is_empty() {
        return Err(anyhow!("empty callsign"));
    }

    let mut rest = field(10).split_whitespace();
    let first = rest.next().ok_or_else(|| anyhow!("missing power"))?;
    let (grid_locator, power_token) = if looks_like_locator(first) {
        let power = rest.next().ok_or_else(|| anyhow!("missing power after locator"))?;
        (first.to_string(), power)
    } else {
        (String::new(), first)
    };
    let power_dbm: i32 = power_token
        .parse()
        .with_context(|| format!("bad power '{}'", power_token))?;

    Ok(Some(Spot {
        cycle_timestamp,
        snr_db,
        time_offset_s,
        frequency_mhz,
        callsign,
        grid_locator,
        power_dbm,
        drift_hz: 0,
    }))
}

/// Parse a whole listing, logging and skipping malformed lines.
pub fn parse_spots(content: &str) -> Vec<Spot> {
    content
        .lines()
        .enumerate()
        .filter_map(|(n, line)| match parse_spot_line(line) {
            Ok(spot) => spot,
            Err(e) => {
                warn!("Skipping malformed spot line {}: {} ({:?})", n + 1, e, line);
                None
            }
        })
        .collect()
}

/// Read and parse a listing file. A missing file means no spots.
pub async fn read_spots_file(path: impl AsRef<Path>) -> Result<Vec<Spot>> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(parse_spots(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
