use anyhow::Result;
use clap::{Parser, Subcommand};
use skycam_stats::pipeline::MeasurementConfig;
use skycam_stats::regions::{RegionCatalog, DEFAULT_EPOCH};
use skycam_stats::sigma_clip::SigmaClipParams;
use skycam_stats::star_detection::{DetectionThreshold, StarDetectionParams};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "skycam-stats")]
#[command(
    about = "Sky region statistics and reference star photometry for all-sky camera frames",
    long_about = None
)]
pub struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Measure a FITS file, or every FITS file in a directory
    Measure {
        /// FITS file or directory of FITS files
        path: String,

        /// Print a line of column names before the records
        #[arg(long)]
        header: bool,

        /// Output format (csv, json)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Only process files whose name matches this regular expression
        #[arg(short, long)]
        pattern: Option<String>,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Number of worker threads (defaults to one per CPU)
        #[arg(short, long)]
        jobs: Option<usize>,

        #[command(flatten)]
        catalog: CatalogOptions,

        #[command(flatten)]
        measurement: MeasurementOptions,
    },

    /// Show the regions of a calibration epoch
    Regions {
        #[command(flatten)]
        catalog: CatalogOptions,
    },
}

#[derive(Parser, Debug, Clone)]
pub struct CatalogOptions {
    /// Built-in calibration epoch to use
    #[arg(long, default_value = DEFAULT_EPOCH)]
    pub epoch: String,

    /// JSON region catalog; overrides --epoch
    #[arg(long)]
    pub regions: Option<PathBuf>,
}

impl CatalogOptions {
    pub fn load(&self) -> Result<RegionCatalog> {
        match &self.regions {
            Some(path) => RegionCatalog::from_json_file(path),
            None => Ok(RegionCatalog::builtin(&self.epoch)?.clone()),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MeasurementOptions {
    /// Sigma-clipping threshold, in standard deviations
    #[arg(long, default_value = "3.0")]
    pub sigma: f64,

    /// Maximum sigma-clipping iterations
    #[arg(long, default_value = "5")]
    pub max_iterations: usize,

    /// Expected star FWHM in pixels
    #[arg(long, default_value = "3.0")]
    pub fwhm: f64,

    /// Detection threshold as a multiple of the background noise
    #[arg(long, default_value = "5.0")]
    pub threshold_sigma: f64,

    /// Absolute detection threshold above background; overrides --threshold-sigma
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Reject candidates with more than this fraction of their flux in one pixel
    #[arg(long, default_value = "0.9")]
    pub max_peak_fraction: f64,
}

impl MeasurementOptions {
    pub fn to_config(&self, catalog: RegionCatalog) -> MeasurementConfig {
        let clip = SigmaClipParams {
            sigma: self.sigma,
            max_iterations: self.max_iterations,
        };
        let threshold = match self.threshold {
            Some(value) => DetectionThreshold::Absolute(value),
            None => DetectionThreshold::BackgroundSigma(self.threshold_sigma),
        };

        MeasurementConfig {
            catalog,
            statistics: clip,
            star: StarDetectionParams {
                fwhm: self.fwhm,
                threshold,
                max_peak_fraction: self.max_peak_fraction,
                background: clip,
            },
        }
    }
}
