use anyhow::{Context, Result};
use regex::Regex;
use skycam_stats::fits::find_fits_files;
use skycam_stats::pipeline::{
    process_batch, process_batch_with_jobs, BatchOutcome, MeasurementConfig,
};
use skycam_stats::record::{csv_line, header_fields, FrameRecord};
use skycam_stats::regions::RegionCatalog;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Json,
}

impl OutputFormat {
    fn parse(format: &str) -> Result<Self> {
        match format.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(anyhow::anyhow!("Unknown output format: {}", other)),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn measure(
    path: &str,
    config: &MeasurementConfig,
    format: &str,
    header: bool,
    pattern: Option<&str>,
    recursive: bool,
    jobs: Option<usize>,
) -> Result<()> {
    config.statistics.validate()?;
    config.star.validate()?;

    let path = Path::new(path);
    let format = OutputFormat::parse(format)?;
    let pattern = pattern
        .map(Regex::new)
        .transpose()
        .context("Invalid file name pattern")?;

    let files = if path.is_file() {
        vec![path.to_path_buf()]
    } else if path.is_dir() {
        let mut files = Vec::new();
        find_fits_files(path, recursive, pattern.as_ref(), &mut files)?;
        files
    } else {
        return Err(anyhow::anyhow!(
            "Path does not exist or is not accessible: {}",
            path.display()
        ));
    };

    info!(
        files = files.len(),
        epoch = config.catalog.epoch(),
        "measuring frames"
    );

    let outcome = match jobs {
        Some(jobs) => process_batch_with_jobs(&files, config, jobs)?,
        None => process_batch(&files, config),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_records(&mut out, &outcome.records, &config.catalog, format, header)?;
    out.flush()?;

    batch_status(path, files.len(), outcome)
}

/// Fail only when not a single frame produced a record.
fn batch_status(path: &Path, total: usize, outcome: BatchOutcome) -> Result<()> {
    if outcome.records.is_empty() {
        return match outcome.failures.into_iter().next() {
            Some(failure) => Err(failure
                .error
                .context(format!("No frame could be measured under {}", path.display()))),
            None => Err(anyhow::anyhow!("No FITS files found under {}", path.display())),
        };
    }

    if !outcome.failures.is_empty() {
        warn!(
            "{} of {} files failed: {}",
            outcome.failures.len(),
            total,
            failed_names(outcome.failures.iter().map(|f| &f.path))
        );
    }
    Ok(())
}

fn failed_names<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> String {
    paths
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_records<W: Write>(
    out: &mut W,
    records: &[FrameRecord],
    catalog: &RegionCatalog,
    format: OutputFormat,
    header: bool,
) -> Result<()> {
    match format {
        OutputFormat::Csv => {
            if header {
                writeln!(out, "{}", csv_line(&header_fields(catalog)))?;
            }
            for record in records {
                writeln!(out, "{}", record.to_csv_line())?;
            }
        }
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(records)?)?;
        }
    }
    Ok(())
}
