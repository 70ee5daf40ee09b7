//! DXCC table data types

/// One DXCC entity from the header line of a CTY.DAT record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub cq_zone: i32,
    pub itu_zone: i32,
    pub continent: String,
    /// Degrees, north positive
    pub latitude: f64,
    /// Degrees, east positive
    pub longitude: f64,
    /// Hours relative to UTC, east positive
    pub time_offset: f64,
    pub primary_prefix: String,
    /// Listed for the WAE award only (`*` on the primary prefix)
    pub wae_only: bool,
}

/// Per-prefix corrections that apply on top of the entity values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefixOverride {
    pub cq_zone: Option<i32>,
    pub itu_zone: Option<i32>,
    pub lat_lon: Option<(f64, f64)>,
    pub continent: Option<String>,
    pub time_offset: Option<f64>,
}

impl PrefixOverride {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
