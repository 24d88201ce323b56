//! Named sky regions, grouped into catalogs per calibration epoch.
//!
//! Region order inside a catalog is the output column order, so catalogs
//! are plain ordered lists rather than maps.

use crate::error::InputError;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

/// Rectangular pixel window, half-open and zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    name: String,
    x: Range<usize>,
    y: Range<usize>,
}

impl Region {
    pub fn new(
        name: impl Into<String>,
        x: Range<usize>,
        y: Range<usize>,
    ) -> Result<Self, InputError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InputError::InvalidRegion {
                name,
                reason: "name is empty".to_string(),
            });
        }
        if x.is_empty() || y.is_empty() {
            return Err(InputError::InvalidRegion {
                reason: format!("empty bounds x:{:?} y:{:?}", x, y),
                name,
            });
        }
        Ok(Region { name, x, y })
    }

    /// Region of `2 * half` pixels on each side centred on (`cx`, `cy`).
    fn centered(name: &str, cx: usize, cy: usize, half: usize) -> Self {
        Region {
            name: name.to_string(),
            x: cx - half..cx + half,
            y: cy - half..cy + half,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn x(&self) -> Range<usize> {
        self.x.clone()
    }

    pub fn y(&self) -> Range<usize> {
        self.y.clone()
    }
}

/// Ordered, immutable set of statistic regions plus the region holding the
/// reference star, valid for one calibration epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCatalog {
    epoch: String,
    regions: Vec<Region>,
    star: Region,
}

impl RegionCatalog {
    pub fn new(
        epoch: impl Into<String>,
        regions: Vec<Region>,
        star: Region,
    ) -> Result<Self, InputError> {
        {
            let mut seen = HashSet::new();
            for name in regions.iter().map(Region::name).chain([star.name()]) {
                if !seen.insert(name) {
                    return Err(InputError::DuplicateRegion(name.to_string()));
                }
            }
        }
        Ok(RegionCatalog {
            epoch: epoch.into(),
            regions,
            star,
        })
    }

    /// Built-in catalog for a named epoch.
    pub fn builtin(epoch: &str) -> Result<&'static RegionCatalog, InputError> {
        BUILTIN_CATALOGS
            .iter()
            .find(|catalog| catalog.epoch == epoch)
            .ok_or_else(|| InputError::UnknownEpoch(epoch.to_string()))
    }

    /// Names of all built-in epochs, oldest first.
    pub fn builtin_epochs() -> impl Iterator<Item = &'static str> {
        BUILTIN_CATALOGS.iter().map(|catalog| catalog.epoch.as_str())
    }

    /// Load a catalog from a JSON description.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read region catalog: {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("Invalid region catalog: {}", path.display()))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let regions = file
            .regions
            .into_iter()
            .map(RegionEntry::into_region)
            .collect::<Result<Vec<_>, _>>()?;
        let star = file.star.into_region()?;
        Ok(RegionCatalog::new(file.epoch, regions, star)?)
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Statistic regions in declaration order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The region searched for the reference star.
    pub fn star_region(&self) -> &Region {
        &self.star
    }

    /// Find a region by name, the star region included.
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions
            .iter()
            .chain(std::iter::once(&self.star))
            .find(|region| region.name == name)
    }
}

impl<'a> IntoIterator for &'a RegionCatalog {
    type Item = &'a Region;
    type IntoIter = std::slice::Iter<'a, Region>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, serde::Deserialize)]
struct CatalogFile {
    epoch: String,
    regions: Vec<RegionEntry>,
    star: RegionEntry,
}

#[derive(Debug, serde::Deserialize)]
struct RegionEntry {
    name: String,
    x: [usize; 2],
    y: [usize; 2],
}

impl RegionEntry {
    fn into_region(self) -> Result<Region, InputError> {
        Region::new(self.name, self.x[0]..self.x[1], self.y[0]..self.y[1])
    }
}

/// Name of the epoch used when none is configured.
pub const DEFAULT_EPOCH: &str = "2019";

static BUILTIN_CATALOGS: LazyLock<Vec<RegionCatalog>> = LazyLock::new(|| {
    vec![RegionCatalog {
        epoch: DEFAULT_EPOCH.to_string(),
        regions: vec![
            // Low in the north, above the brightest part of Tucson's sky glow
            Region {
                name: "TUCSON".to_string(),
                x: 320..335,
                y: 423..433,
            },
            // Low in the SSW, above Nogales
            Region {
                name: "NOGALES".to_string(),
                x: 350..365,
                y: 40..50,
            },
            Region::centered("ZENITH", 304, 238, 10),
            // ~45 deg elevation, between Tucson and Nogales
            Region::centered("SE", 161, 177, 10),
            Region::centered("WNW", 485, 250, 10),
        ],
        star: Region::centered("POLARIS", 310, 372, 10),
    }]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_order() {
        let catalog = RegionCatalog::builtin(DEFAULT_EPOCH).unwrap();
        let names: Vec<_> = catalog.iter().map(Region::name).collect();
        assert_eq!(names, ["TUCSON", "NOGALES", "ZENITH", "SE", "WNW"]);
        assert_eq!(catalog.star_region().name(), "POLARIS");
    }

    #[test]
    fn test_builtin_zenith_bounds() {
        let catalog = RegionCatalog::builtin(DEFAULT_EPOCH).unwrap();
        let zenith = catalog.get("ZENITH").unwrap();
        assert_eq!(zenith.x(), 294..314);
        assert_eq!(zenith.y(), 228..248);
        assert!(catalog.get("POLARIS").is_some());
        assert!(catalog.get("NOWHERE").is_none());
    }

    #[test]
    fn test_unknown_epoch() {
        assert_eq!(
            RegionCatalog::builtin("1850").unwrap_err(),
            InputError::UnknownEpoch("1850".to_string())
        );
        assert!(RegionCatalog::builtin_epochs().any(|e| e == DEFAULT_EPOCH));
    }

    #[test]
    fn test_invalid_region() {
        assert!(Region::new("EMPTY", 10..10, 0..5).is_err());
        assert!(Region::new("", 0..5, 0..5).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = Region::new("REVERSED", 0..5, 9..3);
        assert!(reversed.is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let a = Region::new("A", 0..2, 0..2).unwrap();
        let star = Region::new("A", 4..6, 4..6).unwrap();
        assert_eq!(
            RegionCatalog::new("test", vec![a], star).unwrap_err(),
            InputError::DuplicateRegion("A".to_string())
        );
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"{
            "epoch": "2024",
            "regions": [
                {"name": "ZENITH", "x": [290, 310], "y": [230, 250]},
                {"name": "EAST", "x": [100, 120], "y": [200, 220]}
            ],
            "star": {"name": "POLARIS", "x": [300, 320], "y": [360, 380]}
        }"#;
        let catalog = RegionCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.epoch(), "2024");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.regions()[1].name(), "EAST");
        assert_eq!(catalog.star_region().y(), 360..380);
    }

    #[test]
    fn test_catalog_from_json_rejects_bad_bounds() {
        let json = r#"{
            "epoch": "bad",
            "regions": [{"name": "FLAT", "x": [10, 10], "y": [0, 5]}],
            "star": {"name": "POLARIS", "x": [0, 5], "y": [0, 5]}
        }"#;
        assert!(RegionCatalog::from_json_str(json).is_err());
    }
}
