//! CTY.DAT parser
//!
//! Record layout (colon separated header, then aliases up to `;`):
//!
//! ```text
//! United States:            05:  08:  NA:   37.53:    91.67:     5.0:  K:
//!     AA,AB,=W1AW(5)[8],K,N,W;
//! ```
//!
//! Longitudes and time offsets in the file are west-positive; they are
//! flipped to east-positive here.

use anyhow::{Context, Result, anyhow};
use tracing::warn;

use super::types::{Entity, PrefixOverride};

/// An alias entry attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub prefix: String,
    /// `=CALL` entries match only the full callsign
    pub exact: bool,
    pub overrides: PrefixOverride,
}

/// Parse CTY.DAT text into entities and their aliases.
///
/// Malformed records are logged and skipped.
pub fn parse_cty(content: &str) -> Vec<(Entity, Vec<Alias>)> {
    let mut records = Vec::new();

    for (index, chunk) in content.split(';').enumerate() {
        if chunk.trim().is_empty() {
            continue;
        }
        match parse_record(chunk) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed CTY record #{}: {}", index + 1, e),
        }
    }

    records
}

fn parse_record(chunk: &str) -> Result<(Entity, Vec<Alias>)> {
    let fields: Vec<&str> = chunk.splitn(9, ':').collect();
    if fields.len() < 9 {
        return Err(anyhow!("expected 8 header fields, got {}", fields.len() - 1));
    }

    let primary = fields[7].trim();
    let (primary_prefix, wae_only) = match primary.strip_prefix('*') {
        Some(p) => (p.to_string(), true),
        None => (primary.to_string(), false),
    };

    let entity = Entity {
        name: fields[0].trim().to_string(),
        cq_zone: parse_num(fields[1], "CQ zone")?,
        itu_zone: parse_num(fields[2], "ITU zone")?,
        continent: fields[3].trim().to_string(),
        latitude: parse_num(fields[4], "latitude")?,
        longitude: -parse_num::<f64>(fields[5], "longitude")?,
        time_offset: -parse_num::<f64>(fields[6], "time offset")?,
        primary_prefix,
        wae_only,
    };

    let aliases = fields[8]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_alias)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("entity '{}'", entity.name))?;

    Ok((entity, aliases))
}

fn parse_num<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
    field
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid {}: '{}'", what, field.trim()))
}

/// Parse `=W1AW(5)[8]<37.5/91.7>{NA}~5.0~` style alias tokens.
fn parse_alias(token: &str) -> Result<Alias> {
    let (exact, body) = match token.strip_prefix('=') {
        Some(rest) => (true, rest),
        None => (false, token),
    };

    let split_at = body
        .find(|c| matches!(c, '(' | '[' | '<' | '{' | '~'))
        .unwrap_or(body.len());
    let prefix = body[..split_at].to_uppercase();
    if prefix.is_empty() {
        return Err(anyhow!("empty prefix in '{}'", token));
    }

    let mut overrides = PrefixOverride::default();
    let mut rest = &body[split_at..];

    while let Some(open) = rest.chars().next() {
        let close = match open {
            '(' => ')',
            '[' => ']',
            '<' => '>',
            '{' => '}',
            '~' => '~',
            _ => return Err(anyhow!("unexpected '{}' in '{}'", open, token)),
        };
        let end = rest[1..]
            .find(close)
            .ok_or_else(|| anyhow!("unterminated '{}' in '{}'", open, token))?
            + 1;
        let value = &rest[1..end];

        match open {
            '(' => overrides.cq_zone = Some(parse_num(value, "CQ zone override")?),
            '[' => overrides.itu_zone = Some(parse_num(value, "ITU zone override")?),
            '<' => {
                let (lat, lon) = value
                    .split_once('/')
                    .ok_or_else(|| anyhow!("invalid lat/lon override '{}'", value))?;
                overrides.lat_lon = Some((
                    parse_num(lat, "latitude override")?,
                    -parse_num::<f64>(lon, "longitude override")?,
                ));
            }
            '{' => overrides.continent = Some(value.trim().to_string()),
            _ => overrides.time_offset = Some(-parse_num::<f64>(value, "time offset override")?),
        }

        rest = &rest[end + 1..];
    }

    Ok(Alias { prefix, exact, overrides })
}
