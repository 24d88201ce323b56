//! Sigma-clipped statistics.
//!
//! Values are sorted once up front. Clipping around the median then only
//! ever narrows a contiguous window of the sorted buffer, and every sum is
//! taken in sorted order, so the result depends only on the multiset of
//! input values and not on the order they arrived in.

use crate::error::InputError;
use tracing::debug;

/// Clipping parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaClipParams {
    /// Half-width of the retained band, in standard deviations.
    pub sigma: f64,
    /// Upper bound on clipping passes.
    pub max_iterations: usize,
}

impl SigmaClipParams {
    pub fn validate(&self) -> Result<(), InputError> {
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(InputError::InvalidParameter {
                name: "sigma",
                value: self.sigma,
            });
        }
        Ok(())
    }
}

impl Default for SigmaClipParams {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            max_iterations: 5,
        }
    }
}

/// Mean, median and population standard deviation. `None` marks a value
/// that could not be computed (no usable pixels).
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct StatisticsResult {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub stddev: Option<f64>,
}

impl StatisticsResult {
    pub const UNDEFINED: StatisticsResult = StatisticsResult {
        mean: None,
        median: None,
        stddev: None,
    };

    pub fn is_defined(&self) -> bool {
        self.mean.is_some() && self.median.is_some() && self.stddev.is_some()
    }
}

/// Full outcome of a clipping run.
#[derive(Debug, Clone)]
pub struct SigmaClipOutcome {
    pub stats: StatisticsResult,
    /// Values that survived clipping, ascending.
    pub retained: Vec<f64>,
    /// Number of clipping passes that removed at least one value.
    pub iterations: usize,
    /// False when `max_iterations` stopped the run while values were still
    /// being rejected.
    pub converged: bool,
}

impl SigmaClipOutcome {
    fn undefined(iterations: usize) -> Self {
        SigmaClipOutcome {
            stats: StatisticsResult::UNDEFINED,
            retained: Vec::new(),
            iterations,
            converged: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Summary {
    mean: f64,
    median: f64,
    stddev: f64,
}

impl Summary {
    /// `sorted` must be ascending and non-empty.
    fn of(sorted: &[f64]) -> Self {
        let n = sorted.len();
        let mid = n / 2;
        let median = if n % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        // Offsetting by the median keeps a constant input exact.
        let mean = median + sorted.iter().map(|&v| v - median).sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n as f64;

        Summary {
            mean,
            median,
            stddev: variance.sqrt(),
        }
    }

    fn into_result(self) -> StatisticsResult {
        let defined = |v: f64| v.is_finite().then_some(v);
        StatisticsResult {
            mean: defined(self.mean),
            median: defined(self.median),
            stddev: defined(self.stddev),
        }
    }
}

/// Iteratively clip values further than `sigma` standard deviations from
/// the median. Non-finite inputs are ignored.
pub fn sigma_clip<I>(values: I, params: &SigmaClipParams) -> SigmaClipOutcome
where
    I: IntoIterator<Item = f64>,
{
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return SigmaClipOutcome::undefined(0);
    }
    sorted.sort_by(f64::total_cmp);

    let (mut lo, mut hi) = (0, sorted.len());
    let mut summary = Summary::of(&sorted);
    let mut iterations = 0;

    let converged = loop {
        let window = &sorted[lo..hi];
        let lower = summary.median - params.sigma * summary.stddev;
        let upper = summary.median + params.sigma * summary.stddev;
        let next_lo = lo + window.partition_point(|&v| v < lower);
        let next_hi = lo + window.partition_point(|&v| v <= upper);

        if next_lo == lo && next_hi == hi {
            break true;
        }
        if iterations == params.max_iterations {
            break false;
        }
        if next_lo >= next_hi {
            debug!(iterations, "sigma clipping rejected every value");
            return SigmaClipOutcome::undefined(iterations + 1);
        }

        lo = next_lo;
        hi = next_hi;
        iterations += 1;
        summary = Summary::of(&sorted[lo..hi]);
    };

    if !converged {
        debug!(
            iterations,
            retained = hi - lo,
            "sigma clipping stopped before converging"
        );
    }

    sorted.truncate(hi);
    sorted.drain(..lo);

    SigmaClipOutcome {
        stats: summary.into_result(),
        retained: sorted,
        iterations,
        converged,
    }
}

/// Convenience wrapper returning only the statistics.
pub fn sigma_clipped_stats<I>(values: I, params: &SigmaClipParams) -> StatisticsResult
where
    I: IntoIterator<Item = f64>,
{
    sigma_clip(values, params).stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn gaussian_noise(rng: &mut StdRng, n: usize, mean: f64, sigma: f64) -> Vec<f64> {
        // Box-Muller
        (0..n)
            .map(|_| {
                let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
                let u2: f64 = rng.gen();
                mean + sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
            })
            .collect()
    }

    #[test]
    fn test_constant_input() {
        for sigma in [0.5, 1.0, 3.0, 10.0] {
            let params = SigmaClipParams {
                sigma,
                max_iterations: 5,
            };
            let stats = sigma_clipped_stats(vec![1234.5; 400], &params);
            assert_eq!(stats.mean, Some(1234.5));
            assert_eq!(stats.median, Some(1234.5));
            assert_eq!(stats.stddev, Some(0.0));
        }
    }

    #[test]
    fn test_single_outlier_is_rejected() {
        let mut values = vec![100.0; 400];
        values[137] = 1.0e6;

        let naive_mean = values.iter().sum::<f64>() / values.len() as f64;
        assert!(naive_mean > 2000.0);

        let outcome = sigma_clip(values, &SigmaClipParams::default());
        assert_eq!(outcome.stats.mean, Some(100.0));
        assert_eq!(outcome.stats.median, Some(100.0));
        assert_eq!(outcome.stats.stddev, Some(0.0));
        assert_eq!(outcome.retained.len(), 399);
        assert!(outcome.converged);
    }

    #[test]
    fn test_no_iteration_when_nothing_clipped() {
        let outcome = sigma_clip(vec![1.0, 2.0, 3.0, 4.0, 5.0], &SigmaClipParams::default());
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.converged);
        assert_eq!(outcome.retained, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_relative_eq!(outcome.stats.mean.unwrap(), 3.0);
        assert_relative_eq!(outcome.stats.median.unwrap(), 3.0);
        // population definition: sqrt(10 / 5)
        assert_relative_eq!(outcome.stats.stddev.unwrap(), 2.0_f64.sqrt());
    }

    #[test]
    fn test_gaussian_noise_with_hot_pixels() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut values = gaussian_noise(&mut rng, 2500, 500.0, 10.0);
        for v in values.iter_mut().take(25) {
            *v = 60000.0;
        }

        let stats = sigma_clipped_stats(values, &SigmaClipParams::default());
        assert!((stats.median.unwrap() - 500.0).abs() < 1.5);
        assert!((stats.mean.unwrap() - 500.0).abs() < 1.5);
        assert!((stats.stddev.unwrap() - 10.0).abs() < 1.5);
    }

    #[test]
    fn test_fixed_point_on_retained_set() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut values = gaussian_noise(&mut rng, 1000, 20.0, 3.0);
        values.extend([400.0, 380.0, -200.0, 95.0]);

        let params = SigmaClipParams {
            sigma: 2.5,
            max_iterations: 50,
        };
        let first = sigma_clip(values, &params);
        assert!(first.converged);

        let mut shuffled = first.retained.clone();
        shuffled.shuffle(&mut rng);
        let second = sigma_clip(shuffled, &params);

        assert_eq!(second.stats, first.stats);
        assert_eq!(second.retained, first.retained);
        assert_eq!(second.iterations, 0);
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let values = vec![f64::NAN, 10.0, f64::INFINITY, 10.0, f64::NEG_INFINITY, 10.0];
        let stats = sigma_clipped_stats(values, &SigmaClipParams::default());
        assert_eq!(stats.median, Some(10.0));
        assert_eq!(stats.mean, Some(10.0));
    }

    #[test]
    fn test_degenerate_inputs_are_undefined() {
        let params = SigmaClipParams::default();
        assert_eq!(
            sigma_clipped_stats(Vec::new(), &params),
            StatisticsResult::UNDEFINED
        );
        assert_eq!(
            sigma_clipped_stats(vec![f64::NAN; 16], &params),
            StatisticsResult::UNDEFINED
        );
        assert!(!StatisticsResult::UNDEFINED.is_defined());
    }

    #[test]
    fn test_emptied_retained_set_is_undefined() {
        // median 2, stddev 1; a 0.1 sigma band around 2 holds nothing
        let params = SigmaClipParams {
            sigma: 0.1,
            max_iterations: 5,
        };
        let outcome = sigma_clip(vec![1.0, 3.0], &params);
        assert_eq!(outcome.stats, StatisticsResult::UNDEFINED);
        assert!(outcome.retained.is_empty());
    }

    #[test]
    fn test_invalid_sigma() {
        let params = SigmaClipParams {
            sigma: -1.0,
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert_eq!(
            err,
            InputError::InvalidParameter {
                name: "sigma",
                value: -1.0
            }
        );
        assert_eq!(err.to_string(), "invalid parameter sigma = -1");
    }

    #[test]
    fn test_iteration_limit() {
        let params = SigmaClipParams {
            sigma: 1.0,
            max_iterations: 1,
        };
        let values: Vec<f64> = (0..100).map(|i| (i * i) as f64).collect();
        let outcome = sigma_clip(values, &params);
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.converged);
        assert!(outcome.stats.is_defined());
    }
}
