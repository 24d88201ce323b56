//! Point-source detection and aperture photometry inside a small cutout.
//!
//! Detection follows the usual find-peaks recipe:
//! - background from sigma-clipped statistics of the cutout, median subtracted
//! - residual smoothed with a Gaussian matched to the expected FWHM
//! - local maxima of the smoothed image above the threshold become candidates
//! - each candidate is centroided and measured in a square aperture of
//!   half-width `ceil(fwhm)` around its peak pixel
//!
//! Instrumental magnitudes use a zero-point of 0: `m = -2.5 * log10(flux)`,
//! with `flux` the background-subtracted aperture sum.
use crate::error::InputError;
use crate::frame::Cutout;
use crate::sigma_clip::{sigma_clip, SigmaClipParams, StatisticsResult};
use bumpalo::Bump;
use tracing::debug;

/// FWHM = 2 * sqrt(2 * ln 2) * sigma for a Gaussian profile.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

/// Minimum background-subtracted peak a candidate must exceed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionThreshold {
    /// Fixed intensity above the background median.
    Absolute(f64),
    /// Multiple of the clipped background standard deviation.
    BackgroundSigma(f64),
}

/// Star detection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct StarDetectionParams {
    /// Expected full width at half maximum, in pixels.
    pub fwhm: f64,
    pub threshold: DetectionThreshold,
    /// Reject candidates whose peak pixel carries more than this fraction
    /// of the aperture flux (hot pixels, cosmic rays).
    pub max_peak_fraction: f64,
    /// Clipping used for the background estimate.
    pub background: SigmaClipParams,
}

impl Default for StarDetectionParams {
    fn default() -> Self {
        Self {
            fwhm: 3.0,
            threshold: DetectionThreshold::BackgroundSigma(5.0),
            max_peak_fraction: 0.9,
            background: SigmaClipParams::default(),
        }
    }
}

impl StarDetectionParams {
    pub fn validate(&self) -> Result<(), InputError> {
        self.background.validate()?;
        if !(self.fwhm.is_finite() && self.fwhm > 0.0) {
            return Err(InputError::InvalidParameter {
                name: "fwhm",
                value: self.fwhm,
            });
        }
        let (name, value) = match self.threshold {
            DetectionThreshold::Absolute(t) => ("threshold", t),
            DetectionThreshold::BackgroundSigma(k) => ("threshold_sigma", k),
        };
        if !(value.is_finite() && value >= 0.0) {
            return Err(InputError::InvalidParameter { name, value });
        }
        if !(self.max_peak_fraction > 0.0) {
            return Err(InputError::InvalidParameter {
                name: "max_peak_fraction",
                value: self.max_peak_fraction,
            });
        }
        Ok(())
    }

    fn aperture_half_width(&self) -> usize {
        (self.fwhm.ceil() as usize).max(1)
    }

    fn peak_footprint(&self) -> usize {
        ((self.fwhm / 2.0) as usize).max(1)
    }
}

/// One measured source. Centroid is in cutout-local pixel coordinates;
/// flux and peak are background subtracted.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StarCandidate {
    pub magnitude: f64,
    pub flux: f64,
    pub peak: f64,
    pub x: f64,
    pub y: f64,
}

/// Candidates sorted brightest first, or an explicit "nothing found".
#[derive(Debug, Clone, PartialEq)]
pub enum StarDetectionResult {
    Detected(Vec<StarCandidate>),
    NoDetection,
}

impl StarDetectionResult {
    fn from_candidates(candidates: Vec<StarCandidate>) -> Self {
        if candidates.is_empty() {
            StarDetectionResult::NoDetection
        } else {
            StarDetectionResult::Detected(candidates)
        }
    }

    /// The canonical star: the lowest magnitude candidate.
    pub fn brightest(&self) -> Option<&StarCandidate> {
        self.candidates().first()
    }

    pub fn candidates(&self) -> &[StarCandidate] {
        match self {
            StarDetectionResult::Detected(candidates) => candidates,
            StarDetectionResult::NoDetection => &[],
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, StarDetectionResult::Detected(_))
    }
}

/// Why a local maximum was dropped instead of becoming a candidate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CandidateRejection {
    #[error("peak at ({x}, {y}) has non-positive aperture flux {flux}")]
    NonPositiveFlux { x: usize, y: usize, flux: f64 },

    #[error("peak at ({x}, {y}) has no finite centroid")]
    NonFiniteCentroid { x: usize, y: usize },

    #[error("peak at ({x}, {y}) holds {fraction:.2} of its flux in one pixel")]
    TooSharp { x: usize, y: usize, fraction: f64 },
}

/// Everything a detection run produced.
#[derive(Debug, Clone)]
pub struct StarDetection {
    pub result: StarDetectionResult,
    /// Clipped statistics of the cutout used as background.
    pub background: StatisticsResult,
    /// Absolute threshold applied to background-subtracted peaks; `None`
    /// when the background was undefined.
    pub threshold: Option<f64>,
    pub rejected: Vec<CandidateRejection>,
}

impl StarDetection {
    fn empty(background: StatisticsResult) -> Self {
        StarDetection {
            result: StarDetectionResult::NoDetection,
            background,
            threshold: None,
            rejected: Vec::new(),
        }
    }
}

/// Detect and measure point sources in `cutout`.
///
/// Finding nothing is a normal outcome. Only invalid parameters are errors.
pub fn detect_stars(
    cutout: &Cutout<'_>,
    params: &StarDetectionParams,
) -> Result<StarDetection, InputError> {
    params.validate()?;

    let (height, width) = cutout.shape();
    let arena = Bump::new();
    let mut pixels = bumpalo::collections::Vec::with_capacity_in(width * height, &arena);
    pixels.extend(cutout.values());

    let background = sigma_clip(pixels.iter().copied(), &params.background).stats;
    let (Some(median), Some(noise)) = (background.median, background.stddev) else {
        debug!("background undefined, skipping star detection");
        return Ok(StarDetection::empty(background));
    };

    // Quantized sky can clip down to a single level and a zero spread. The
    // digitisation noise of a step q is q / sqrt(12), so never go below it.
    let noise = match quantization_step(&arena, &pixels) {
        Some(step) => noise.max(step / 12f64.sqrt()),
        None => noise,
    };

    let threshold = match params.threshold {
        DetectionThreshold::Absolute(t) => t,
        DetectionThreshold::BackgroundSigma(k) => k * noise,
    };

    for p in pixels.iter_mut() {
        *p -= median;
    }
    let residual = &pixels[..];
    // Windows wider than the cutout see nothing more
    let extent = width.max(height);
    let smoothed = smooth_gaussian(&arena, residual, width, height, params.fwhm);
    let peaks = find_local_maxima(
        residual,
        &smoothed,
        width,
        height,
        threshold,
        params.peak_footprint().min(extent),
    );

    let half = params.aperture_half_width().min(extent);
    let mut candidates = Vec::with_capacity(peaks.len());
    let mut rejected = Vec::new();
    for (px, py) in peaks {
        match measure_candidate(residual, width, height, px, py, half, params.max_peak_fraction) {
            Ok(candidate) => candidates.push(candidate),
            Err(rejection) => {
                debug!(%rejection, "dropping star candidate");
                rejected.push(rejection);
            }
        }
    }
    candidates.sort_by(|a, b| a.magnitude.total_cmp(&b.magnitude));

    debug!(
        background = median,
        noise,
        threshold,
        found = candidates.len(),
        rejected = rejected.len(),
        "star detection finished"
    );

    Ok(StarDetection {
        result: StarDetectionResult::from_candidates(candidates),
        background,
        threshold: Some(threshold),
        rejected,
    })
}

/// Normalised Gaussian convolution that skips non-finite pixels.
fn smooth_gaussian<'a>(
    arena: &'a Bump,
    data: &[f64],
    width: usize,
    height: usize,
    fwhm: f64,
) -> bumpalo::collections::Vec<'a, f64> {
    let sigma = fwhm / FWHM_PER_SIGMA;
    let radius = ((1.5 * sigma).ceil() as usize).clamp(1, width.max(height).max(1));
    let size = 2 * radius + 1;

    let mut kernel = bumpalo::collections::Vec::with_capacity_in(size * size, arena);
    for ky in 0..size {
        for kx in 0..size {
            let dx = kx as f64 - radius as f64;
            let dy = ky as f64 - radius as f64;
            kernel.push((-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp());
        }
    }

    let mut smoothed = bumpalo::collections::Vec::with_capacity_in(data.len(), arena);
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            let mut weight = 0.0;
            for ky in 0..size {
                let Some(sy) = (y + ky).checked_sub(radius).filter(|&sy| sy < height) else {
                    continue;
                };
                for kx in 0..size {
                    let Some(sx) = (x + kx).checked_sub(radius).filter(|&sx| sx < width) else {
                        continue;
                    };
                    let value = data[sy * width + sx];
                    if value.is_finite() {
                        let w = kernel[ky * size + kx];
                        sum += w * value;
                        weight += w;
                    }
                }
            }
            smoothed.push(if weight > 0.0 { sum / weight } else { f64::NAN });
        }
    }
    smoothed
}

/// Smallest spacing between distinct finite values, the digitisation step
/// of integer or scaled-integer data. `None` with fewer than two levels.
fn quantization_step(arena: &Bump, values: &[f64]) -> Option<f64> {
    let mut sorted = bumpalo::collections::Vec::with_capacity_in(values.len(), arena);
    sorted.extend(values.iter().copied().filter(|v| v.is_finite()));
    sorted.sort_unstable_by(f64::total_cmp);
    sorted
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|&gap| gap > 0.0)
        .min_by(f64::total_cmp)
}

/// Pixels that are the maximum of the smoothed image within `footprint`
/// and whose residual exceeds `threshold`. Plateaus resolve to their first
/// pixel in raster order.
fn find_local_maxima(
    residual: &[f64],
    smoothed: &[f64],
    width: usize,
    height: usize,
    threshold: f64,
    footprint: usize,
) -> Vec<(usize, usize)> {
    let mut peaks = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let value = smoothed[idx];
            if !value.is_finite() || !(residual[idx] > threshold) {
                continue;
            }

            let mut is_max = true;
            'scan: for ny in y.saturating_sub(footprint)..=(y + footprint).min(height - 1) {
                for nx in x.saturating_sub(footprint)..=(x + footprint).min(width - 1) {
                    let nidx = ny * width + nx;
                    if nidx == idx {
                        continue;
                    }
                    let other = smoothed[nidx];
                    if other > value || (other == value && nidx < idx) {
                        is_max = false;
                        break 'scan;
                    }
                }
            }
            if is_max {
                peaks.push((x, y));
            }
        }
    }
    peaks
}

/// Centroid and aperture photometry around peak pixel (`px`, `py`).
fn measure_candidate(
    residual: &[f64],
    width: usize,
    height: usize,
    px: usize,
    py: usize,
    half: usize,
    max_peak_fraction: f64,
) -> Result<StarCandidate, CandidateRejection> {
    let mut flux = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    let mut sum_wy = 0.0;

    for y in py.saturating_sub(half)..=(py + half).min(height - 1) {
        for x in px.saturating_sub(half)..=(px + half).min(width - 1) {
            let value = residual[y * width + x];
            if !value.is_finite() {
                continue;
            }
            flux += value;
            peak = peak.max(value);
            if value > 0.0 {
                sum_w += value;
                sum_wx += value * x as f64;
                sum_wy += value * y as f64;
            }
        }
    }

    if !(flux > 0.0) {
        return Err(CandidateRejection::NonPositiveFlux {
            x: px,
            y: py,
            flux,
        });
    }

    let cx = sum_wx / sum_w;
    let cy = sum_wy / sum_w;
    if !(cx.is_finite() && cy.is_finite()) {
        return Err(CandidateRejection::NonFiniteCentroid { x: px, y: py });
    }

    let fraction = peak / flux;
    if fraction > max_peak_fraction {
        return Err(CandidateRejection::TooSharp {
            x: px,
            y: py,
            fraction,
        });
    }

    Ok(StarCandidate {
        magnitude: -2.5 * flux.log10(),
        flux,
        peak,
        x: cx,
        y: cy,
    })
}
