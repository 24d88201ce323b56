//! Output records: one row per frame with a fixed column layout.
//!
//! Columns are the metadata cards, three statistics per catalog region,
//! the five star measurements and finally the source file name. Undefined
//! values render as empty fields so every row has the same width.

use crate::frame::CardValue;
use crate::regions::RegionCatalog;
use crate::sigma_clip::StatisticsResult;
use crate::star_detection::StarCandidate;
use serde::ser::{SerializeMap, Serializer};

/// Header cards copied into every record, in column order.
pub const METADATA_CARDS: [&str; 8] = ["UT", "GAIN", "FRAME", "LST", "AZ", "EL", "SCOPEX", "SCOPEY"];

pub const STATISTIC_SUFFIXES: [&str; 3] = ["mean", "median", "std"];

pub const STAR_COLUMNS: [&str; 5] = ["star_mag", "star_flux", "star_peak", "star_x", "star_y"];

pub const SOURCE_COLUMN: &str = "filename";

/// Decimal places used for numeric statistic and star fields.
pub const PRECISION: usize = 3;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RegionStatistics {
    pub region: String,
    #[serde(flatten)]
    pub stats: StatisticsResult,
}

/// Measurements for one frame, ready to be written out.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FrameRecord {
    /// Values of [`METADATA_CARDS`], same order. Serialized as a map keyed
    /// by card name.
    #[serde(serialize_with = "serialize_metadata")]
    pub metadata: Vec<CardValue>,
    /// One entry per catalog region, catalog order.
    pub regions: Vec<RegionStatistics>,
    pub star: Option<StarCandidate>,
    pub source: String,
}

fn serialize_metadata<S: Serializer>(
    metadata: &[CardValue],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(metadata.len()))?;
    for (key, value) in METADATA_CARDS.iter().zip(metadata) {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

/// Column names for a catalog, matching [`FrameRecord::fields`].
pub fn header_fields(catalog: &RegionCatalog) -> Vec<String> {
    let mut fields: Vec<String> = METADATA_CARDS.iter().map(|s| s.to_string()).collect();
    for region in catalog {
        fields.extend(
            STATISTIC_SUFFIXES
                .iter()
                .map(|suffix| format!("{}_{}", region.name(), suffix)),
        );
    }
    fields.extend(STAR_COLUMNS.iter().map(|s| s.to_string()));
    fields.push(SOURCE_COLUMN.to_string());
    fields
}

pub fn column_count(catalog: &RegionCatalog) -> usize {
    METADATA_CARDS.len() + catalog.len() * STATISTIC_SUFFIXES.len() + STAR_COLUMNS.len() + 1
}

fn format_value(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.*}", PRECISION, v))
        .unwrap_or_default()
}

impl FrameRecord {
    /// Rendered field values in column order.
    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.metadata.iter().map(|v| v.to_string()).collect();

        for entry in &self.regions {
            fields.push(format_value(entry.stats.mean));
            fields.push(format_value(entry.stats.median));
            fields.push(format_value(entry.stats.stddev));
        }

        match &self.star {
            Some(star) => fields.extend(
                [star.magnitude, star.flux, star.peak, star.x, star.y]
                    .into_iter()
                    .map(|v| format_value(Some(v))),
            ),
            None => fields.extend(std::iter::repeat_n(String::new(), STAR_COLUMNS.len())),
        }

        fields.push(self.source.clone());
        fields
    }

    pub fn to_csv_line(&self) -> String {
        csv_line(&self.fields())
    }
}

/// Join fields with commas, quoting any that need it.
pub fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains([',', '"', '\n']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
