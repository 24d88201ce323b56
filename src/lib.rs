pub mod error;
pub mod fits;
pub mod frame;
pub mod pipeline;
pub mod record;
pub mod regions;
pub mod sigma_clip;
pub mod star_detection;

// Re-export commonly used items
pub use error::InputError;
pub use frame::{normalize, CardValue, Cutout, Frame, FrameLayout, RawFrame};
pub use pipeline::{measure_frame, process_batch, process_file, BatchOutcome, MeasurementConfig};
pub use record::{FrameRecord, METADATA_CARDS};
pub use regions::{Region, RegionCatalog};
pub use sigma_clip::{sigma_clip, sigma_clipped_stats, SigmaClipParams, StatisticsResult};
pub use star_detection::{
    detect_stars, DetectionThreshold, StarCandidate, StarDetectionParams, StarDetectionResult,
};
