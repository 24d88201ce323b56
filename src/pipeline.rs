//! Per-frame measurement and the parallel batch over many files.

use crate::error::InputError;
use crate::fits::load_raw_frame;
use crate::frame::{normalize, Frame};
use crate::record::{FrameRecord, RegionStatistics, METADATA_CARDS};
use crate::regions::RegionCatalog;
use crate::sigma_clip::{sigma_clipped_stats, SigmaClipParams};
use crate::star_detection::{detect_stars, StarDetectionParams};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything needed to turn a frame into a record.
#[derive(Debug, Clone)]
pub struct MeasurementConfig {
    pub catalog: RegionCatalog,
    pub statistics: SigmaClipParams,
    pub star: StarDetectionParams,
}

impl MeasurementConfig {
    pub fn new(catalog: RegionCatalog) -> Self {
        Self {
            catalog,
            statistics: SigmaClipParams::default(),
            star: StarDetectionParams::default(),
        }
    }
}

/// Measure one canonical frame.
pub fn measure_frame(
    frame: &Frame,
    source: &str,
    config: &MeasurementConfig,
) -> Result<FrameRecord, InputError> {
    let metadata = METADATA_CARDS
        .iter()
        .map(|&key| frame.card(key).cloned())
        .collect::<Result<Vec<_>, _>>()?;

    let mut regions = Vec::with_capacity(config.catalog.len());
    for region in &config.catalog {
        let cutout = frame.cutout(region)?;
        regions.push(RegionStatistics {
            region: region.name().to_string(),
            stats: sigma_clipped_stats(cutout.values(), &config.statistics),
        });
    }

    let star_cutout = frame.cutout(config.catalog.star_region())?;
    let detection = detect_stars(&star_cutout, &config.star)?;
    let star = detection.result.brightest().cloned();
    if star.is_none() {
        debug!(source, "no star detected");
    }

    Ok(FrameRecord {
        metadata,
        regions,
        star,
        source: source.to_string(),
    })
}

/// Load, normalize and measure a single file.
pub fn process_file(path: &Path, config: &MeasurementConfig) -> Result<FrameRecord> {
    let raw = load_raw_frame(path, &METADATA_CARDS)?;
    let frame = normalize(raw).with_context(|| format!("Bad pixel data in {}", path.display()))?;
    let record = measure_frame(&frame, &source_name(path), config)
        .with_context(|| format!("Failed to measure {}", path.display()))?;
    Ok(record)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// A file that could not be processed.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: anyhow::Error,
}

/// Outcome of a batch: records sorted by file name, plus failures.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<FrameRecord>,
    pub failures: Vec<FileFailure>,
}

/// Process files in parallel. A failing file is reported and skipped; it
/// never stops the rest of the batch.
pub fn process_batch(paths: &[PathBuf], config: &MeasurementConfig) -> BatchOutcome {
    let mut results: Vec<(&PathBuf, Result<FrameRecord>)> = paths
        .par_iter()
        .map(|path| (path, process_file(path, config)))
        .collect();

    // Completion order is irrelevant; output follows file name order
    results.sort_by(|(a, _), (b, _)| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));

    let mut outcome = BatchOutcome::default();
    for (path, result) in results {
        match result {
            Ok(record) => outcome.records.push(record),
            Err(error) => {
                warn!(path = %path.display(), "skipping file: {:#}", error);
                outcome.failures.push(FileFailure {
                    path: path.clone(),
                    error,
                });
            }
        }
    }

    info!(
        processed = outcome.records.len(),
        failed = outcome.failures.len(),
        "batch finished"
    );
    outcome
}

/// Run [`process_batch`] on a dedicated pool of `jobs` threads.
pub fn process_batch_with_jobs(
    paths: &[PathBuf],
    config: &MeasurementConfig,
    jobs: usize,
) -> Result<BatchOutcome> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("Failed to build worker pool")?;
    Ok(pool.install(|| process_batch(paths, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CardValue;
    use crate::record::{column_count, STAR_COLUMNS};
    use crate::regions::Region;
    use std::collections::HashMap;

    fn metadata() -> HashMap<String, CardValue> {
        METADATA_CARDS
            .iter()
            .enumerate()
            .map(|(i, key)| (key.to_string(), CardValue::Integer(i as i64)))
            .collect()
    }

    fn catalog() -> RegionCatalog {
        RegionCatalog::new(
            "test",
            vec![
                Region::new("NORTH", 0..10, 0..10).unwrap(),
                Region::new("MIDDLE", 20..30, 20..30).unwrap(),
                Region::new("SOUTH", 40..50, 40..50).unwrap(),
            ],
            Region::new("STAR", 30..50, 0..20).unwrap(),
        )
        .unwrap()
    }

    /// 64x64 frame with a flat background and a Gaussian star at (40, 10).
    fn frame_with_star(amplitude: f64) -> Frame {
        let sigma = 3.0 / crate::star_detection::FWHM_PER_SIGMA;
        let pixels = (0..64)
            .flat_map(|y| (0..64).map(move |x| (x, y)))
            .map(|(x, y)| {
                let dx = x as f64 - 40.0;
                let dy = y as f64 - 10.0;
                // deterministic ripple stands in for noise
                let ripple = ((x * 7 + y * 13) % 5) as f64 - 2.0;
                200.0 + ripple + amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        Frame::new(64, 64, pixels, metadata()).unwrap()
    }

    #[test]
    fn test_record_layout_with_detection() {
        let config = MeasurementConfig::new(catalog());
        let record = measure_frame(&frame_with_star(3000.0), "a.fits", &config).unwrap();

        assert_eq!(record.metadata.len(), METADATA_CARDS.len());
        assert_eq!(record.regions.len(), 3);
        assert_eq!(record.regions[1].region, "MIDDLE");
        assert!(record.regions.iter().all(|r| r.stats.is_defined()));

        let star = record.star.as_ref().unwrap();
        // cutout-local: star region starts at x=30, y=0
        assert!((star.x - 10.0).abs() < 0.5);
        assert!((star.y - 10.0).abs() < 0.5);

        let fields = record.fields();
        assert_eq!(fields.len(), column_count(&config.catalog));
        assert_eq!(fields.len(), 8 + 3 * 3 + STAR_COLUMNS.len() + 1);
    }

    #[test]
    fn test_record_layout_without_detection() {
        let config = MeasurementConfig::new(catalog());
        let record = measure_frame(&frame_with_star(0.0), "b.fits", &config).unwrap();

        assert!(record.star.is_none());
        let fields = record.fields();
        assert_eq!(fields.len(), column_count(&config.catalog));
        let star_start = 8 + 3 * 3;
        assert!(fields[star_start..star_start + 5].iter().all(String::is_empty));
        assert_eq!(fields.last().unwrap(), "b.fits");
    }

    #[test]
    fn test_missing_card_fails_frame() {
        let mut frame_metadata = metadata();
        frame_metadata.remove("SCOPEY");
        let frame = Frame::new(64, 64, vec![0.0; 64 * 64], frame_metadata).unwrap();

        let err = measure_frame(&frame, "c.fits", &MeasurementConfig::new(catalog())).unwrap_err();
        assert_eq!(err, InputError::MissingCard("SCOPEY".to_string()));
    }

    #[test]
    fn test_region_outside_frame_fails_frame() {
        let frame = Frame::new(32, 32, vec![0.0; 32 * 32], metadata()).unwrap();
        let err = measure_frame(&frame, "d.fits", &MeasurementConfig::new(catalog())).unwrap_err();
        assert!(matches!(err, InputError::RegionOutOfBounds { ref name, .. } if name == "SOUTH"));
    }

    #[test]
    fn test_batch_skips_unreadable_files() {
        let paths = vec![
            PathBuf::from("/nonexistent/b.fits"),
            PathBuf::from("/nonexistent/a.fits"),
        ];
        let outcome = process_batch(&paths, &MeasurementConfig::new(catalog()));
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].path, PathBuf::from("/nonexistent/a.fits"));
    }
}
