//! Prefix sums of log amounts and the Gaussian density score built on them.

use std::f64::consts::PI;

/// Scale of the standard-deviation floor, `sigma >= SIGMA_FLOOR / sqrt(n)`
pub const SIGMA_FLOOR: f64 = 100.0;

/// Running totals over the samples strictly before a row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorMoments {
    pub count: usize,
    pub sum: f64,
    pub sum_sq: f64,
}

impl PriorMoments {
    fn push(self, x: f64) -> Self {
        Self {
            count: self.count + 1,
            sum: self.sum + x,
            sum_sq: self.sum_sq + x * x,
        }
    }

    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    /// Sample standard deviation from the cumulative sums, clipped at zero.
    /// A single sample has no spread and yields 0.
    pub fn sample_std(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let variance = ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0);
        variance.sqrt()
    }

    /// Density of `x` under N(mean, sigma) with the floored sigma.
    ///
    /// `None` when there are no prior samples; the value may be non-finite when
    /// the sums overflow.
    pub fn norm_pdf(&self, x: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let sigma_min = SIGMA_FLOOR / (self.count as f64).sqrt();
        let sigma = self.sample_std().max(sigma_min);
        Some(gaussian_pdf(x, self.mean(), sigma))
    }
}

impl std::ops::Add for PriorMoments {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
        }
    }
}

impl std::ops::Sub for PriorMoments {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self {
            count: self.count.saturating_sub(other.count),
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }
}

pub fn gaussian_pdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
}

/// `prefix[i]` holds the moments of the first `i` samples of a key
#[derive(Debug, Clone)]
pub struct PrefixMoments {
    prefix: Vec<PriorMoments>,
}

impl PrefixMoments {
    pub fn from_samples(samples: impl IntoIterator<Item = f64>) -> Self {
        let mut prefix = vec![PriorMoments::default()];
        let mut running = PriorMoments::default();
        for x in samples {
            running = running.push(x);
            prefix.push(running);
        }
        Self { prefix }
    }

    /// Moments of the first `k` samples
    pub fn prior(&self, k: usize) -> PriorMoments {
        self.prefix[k.min(self.prefix.len() - 1)]
    }
}

impl Default for PrefixMoments {
    fn default() -> Self {
        Self::from_samples([])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_prior_sample_uses_floor() {
        let x = 100f64.ln_1p();
        let moments = PrefixMoments::from_samples([x]).prior(1);
        assert_eq!(moments.sample_std(), 0.0);

        let pdf = moments.norm_pdf(x).unwrap();
        let expected = 1.0 / (100.0 * (2.0 * PI).sqrt());
        assert!((pdf - expected).abs() < 1e-12);
    }

    #[test]
    fn test_no_prior_samples() {
        let moments = PrefixMoments::from_samples([1.0, 2.0]).prior(0);
        assert!(moments.norm_pdf(1.0).is_none());
    }

    #[test]
    fn test_floor_shrinks_with_count() {
        // 10_000 identical samples: std 0, floor 100 / 100 = 1
        let moments = PrefixMoments::from_samples(std::iter::repeat(5.0).take(10_000)).prior(10_000);
        let pdf = moments.norm_pdf(5.0).unwrap();
        assert!((pdf - gaussian_pdf(5.0, 5.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_removing_samples_restores_prefix() {
        let all = PrefixMoments::from_samples([1.0, 2.0, 4.0]).prior(3);
        let removed = PrefixMoments::from_samples([4.0]).prior(1);
        let kept = all - removed;
        assert_eq!(kept.count, 2);
        assert!((kept.mean() - 1.5).abs() < 1e-12);

        let empty = PrefixMoments::default().prior(5);
        assert_eq!(kept + empty, kept);
        assert!(empty.norm_pdf(1.0).is_none());
    }

    #[test]
    fn test_wide_spread_beats_floor() {
        let samples = [0.0, 1000.0, 2000.0];
        let moments = PrefixMoments::from_samples(samples).prior(3);
        assert!((moments.mean() - 1000.0).abs() < 1e-9);
        assert!((moments.sample_std() - 1000.0).abs() < 1e-6);
    }
}
