//! Prefix table and callsign lookup

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::Path;
use wspr_common::{DxccInfo, EnrichedSpot, Spot};

use super::parser::parse_cty;
use super::types::{Entity, PrefixOverride};

#[derive(Debug, Clone)]
struct Binding {
    entity: usize,
    overrides: PrefixOverride,
}

/// Immutable callsign → DXCC entity table.
#[derive(Debug, Clone, Default)]
pub struct DxccTable {
    entities: Vec<Entity>,
    prefixes: HashMap<String, Binding>,
    exact: HashMap<String, Binding>,
}

impl DxccTable {
    /// Load a CTY.DAT file. An unreadable or empty file is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading DXCC prefix table from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read CTY file: {}", path.display()))?;

        let table = Self::from_cty(&content);
        if table.entities.is_empty() {
            bail!("CTY file {} contains no entities", path.display());
        }

        tracing::info!(
            "Loaded {} DXCC entities ({} prefixes, {} exact calls)",
            table.entities.len(),
            table.prefixes.len(),
            table.exact.len()
        );

        Ok(table)
    }

    pub fn from_cty(content: &str) -> Self {
        let mut table = Self::default();

        for (entity, aliases) in parse_cty(content) {
            let index = table.entities.len();
            table.entities.push(entity);

            for alias in aliases {
                let binding = Binding {
                    entity: index,
                    overrides: alias.overrides,
                };
                let map = if alias.exact { &mut table.exact } else { &mut table.prefixes };
                map.insert(alias.prefix, binding);
            }
        }

        table
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Resolve a callsign: exact binding first, then the longest prefix.
    /// Unknown calls yield an empty [`DxccInfo`].
    pub fn lookup(&self, callsign: &str) -> DxccInfo {
        let call = callsign.trim().to_uppercase();
        if call.is_empty() {
            return DxccInfo::default();
        }

        let binding = self.exact.get(&call).or_else(|| {
            call.char_indices()
                .map(|(i, c)| &call[..i + c.len_utf8()])
                .rev()
                .find_map(|prefix| self.prefixes.get(prefix))
        });

        match binding {
            Some(binding) => self.resolve(binding),
            None => DxccInfo::default(),
        }
    }

    fn resolve(&self, binding: &Binding) -> DxccInfo {
        let entity = &self.entities[binding.entity];
        let overrides = &binding.overrides;

        let mut info = DxccInfo {
            country: entity.name.clone(),
            cq_zone: entity.cq_zone,
            itu_zone: entity.itu_zone,
            continent: entity.continent.clone(),
            latitude: entity.latitude,
            longitude: entity.longitude,
            time_offset_hours: entity.time_offset,
        };

        if let Some(cq) = overrides.cq_zone.filter(|z| *z != 0) {
            info.cq_zone = cq;
        }
        if let Some(itu) = overrides.itu_zone.filter(|z| *z != 0) {
            info.itu_zone = itu;
        }
        if let Some(continent) = overrides.continent.as_ref().filter(|c| !c.is_empty()) {
            info.continent = continent.clone();
        }
        if let Some((lat, lon)) = overrides.lat_lon {
            info.latitude = lat;
            info.longitude = lon;
        }
        if let Some(offset) = overrides.time_offset {
            info.time_offset_hours = offset;
        }

        info
    }

    pub fn enrich(&self, spot: Spot) -> EnrichedSpot {
        let dxcc = self.lookup(&spot.callsign);
        EnrichedSpot { spot, dxcc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CTY: &str = "\
United States:            05:  08:  NA:   37.53:    91.67:     5.0:  K:
    AA,K,N,W,=W1AW(5)[8],KH6(31)[61]<21.3/157.9>{OC}~10.0~;
Hawaii:                   31:  61:  OC:   21.12:   157.48:    10.0:  KH6:
    =KH6XYZ;
Canada:                   05:  09:  NA:   44.35:    78.75:     5.0:  VE:
    VA,VE,VE8(1)[2];
";

    #[test]
    fn test_longest_prefix_wins() {
        let table = DxccTable::from_cty(CTY);
        assert_eq!(table.entity_count(), 3);

        let info = table.lookup("w1abc");
        assert_eq!(info.country, "United States");
        assert_eq!(info.cq_zone, 5);

        let info = table.lookup("VE8AA");
        assert_eq!(info.country, "Canada");
        assert_eq!(info.cq_zone, 1);
        assert_eq!(info.itu_zone, 2);
        assert_eq!(info.continent, "NA");
    }

    #[test]
    fn test_overrides_compose_onto_entity() {
        let table = DxccTable::from_cty(CTY);
        let info = table.lookup("KH6ABC");
        assert_eq!(info.country, "United States");
        assert_eq!(info.cq_zone, 31);
        assert_eq!(info.itu_zone, 61);
        assert_eq!(info.continent, "OC");
        assert_eq!(info.latitude, 21.3);
        assert_eq!(info.longitude, -157.9);
        assert_eq!(info.time_offset_hours, -10.0);
    }

    #[test]
    fn test_exact_binding_beats_prefix() {
        let table = DxccTable::from_cty(CTY);
        assert_eq!(table.lookup("KH6XYZ").country, "Hawaii");
        assert_eq!(table.lookup("KH6XY").country, "United States");
    }

    #[test]
    fn test_unknown_callsign() {
        let table = DxccTable::from_cty(CTY);
        assert_eq!(table.lookup("9Z9ZZ"), DxccInfo::default());
        assert_eq!(table.lookup(""), DxccInfo::default());
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let table = DxccTable::from_cty(CTY);
        for call in ["W1ABC", "KH6XYZ", "VE8AA", "Q0Q"] {
            assert_eq!(table.lookup(call), table.lookup(call));
        }
    }

    #[tokio::test]
    async fn test_load_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cty.dat");
        std::fs::write(&path, "").unwrap();
        assert!(DxccTable::load(&path).await.is_err());

        assert!(DxccTable::load(dir.path().join("missing.dat")).await.is_err());

        std::fs::write(&path, CTY).unwrap();
        assert_eq!(DxccTable::load(&path).await.unwrap().entity_count(), 3);
    }
}
