//! Decoded spots and the broker message built from them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// One decoded WSPR transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Cycle boundary the transmission belongs to
    pub cycle_timestamp: DateTime<Utc>,
    pub snr_db: i32,
    /// Time offset against the cycle start, seconds
    pub time_offset_s: f64,
    /// Absolute decoded frequency, MHz
    pub frequency_mhz: f64,
    /// Callsign with surrounding `<>` removed
    pub callsign: String,
    /// Maidenhead locator, empty when not transmitted
    pub grid_locator: String,
    pub power_dbm: i32,
    /// Hz per minute; the decoder output in use does not carry it
    pub drift_hz: i32,
}

/// DXCC entity data resolved for a callsign.
///
/// All numeric fields stay zero and `country` empty when the callsign
/// matched nothing in the prefix table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DxccInfo {
    pub country: String,
    pub cq_zone: i32,
    pub itu_zone: i32,
    pub continent: String,
    pub latitude: f64,
    pub longitude: f64,
    pub time_offset_hours: f64,
}

/// A spot joined with its DXCC entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSpot {
    pub spot: Spot,
    pub dxcc: DxccInfo,
}

/// JSON payload published for every spot.
///
/// Field names are part of the wire contract with downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotMessage {
    pub mode: String,
    pub band: String,
    pub callsign: String,
    pub locator: String,
    pub country: String,
    #[serde(rename = "CQZone")]
    pub cq_zone: i32,
    #[serde(rename = "ITUZone")]
    pub itu_zone: i32,
    #[serde(rename = "Continent")]
    pub continent: String,
    #[serde(rename = "TimeOffset")]
    pub time_offset: f64,
    pub snr: i32,
    /// Dial frequency in Hz
    pub frequency: u64,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub dt: f64,
    pub drift: i32,
    pub dbm: i32,
    /// Decoded transmitter frequency in Hz
    pub tx_frequency: u64,
}

fn serialize_rfc3339<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl SpotMessage {
    pub const MODE: &'static str = "WSPR";

    /// Build the wire message for a spot received on `dial_khz` and
    /// labelled `band`.
    pub fn new(enriched: &EnrichedSpot, band: &str, dial_khz: f64) -> Self {
        let spot = &enriched.spot;
        let dxcc = &enriched.dxcc;

        Self {
            mode: Self::MODE.to_string(),
            band: band.to_string(),
            callsign: spot.callsign.clone(),
            locator: spot.grid_locator.clone(),
            country: dxcc.country.clone(),
            cq_zone: dxcc.cq_zone,
            itu_zone: dxcc.itu_zone,
            continent: dxcc.continent.clone(),
            time_offset: dxcc.time_offset_hours,
            snr: spot.snr_db,
            frequency: (dial_khz * 1000.0).round() as u64,
            timestamp: spot.cycle_timestamp,
            message: format!("{} {} {}", spot.callsign, spot.grid_locator, spot.power_dbm),
            dt: spot.time_offset_s,
            drift: spot.drift_hz,
            dbm: spot.power_dbm,
            tx_frequency: (spot.frequency_mhz * 1e6).round() as u64,
        }
    }

    /// Recover the spot fields carried by this message.
    pub fn to_spot(&self) -> Spot {
        Spot {
            cycle_timestamp: self.timestamp,
            snr_db: self.snr,
            time_offset_s: self.dt,
            frequency_mhz: self.tx_frequency as f64 / 1e6,
            callsign: self.callsign.clone(),
            grid_locator: self.locator.clone(),
            power_dbm: self.dbm,
            drift_hz: self.drift,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Broker topic for a spot: `<prefix>/digital_modes/WSPR/<band>`.
pub fn spot_topic(prefix: &str, band: &str) -> String {
    format!("{}/digital_modes/WSPR/{}", prefix.trim_end_matches('/'), band)
}
