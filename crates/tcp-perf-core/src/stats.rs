//! Summary statistics over plain samples. Every function returns `None`
//! for an empty slice instead of dividing by zero.

use serde::Serialize;

pub fn sum(samples: &[f64]) -> f64 {
    samples.iter().sum()
}

pub fn min(samples: &[f64]) -> Option<f64> {
    samples.iter().copied().reduce(f64::min)
}

pub fn max(samples: &[f64]) -> Option<f64> {
    samples.iter().copied().reduce(f64::max)
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(sum(samples) / samples.len() as f64)
}

/// Population standard deviation, `sqrt(mean((x - mean(x))^2))`.
pub fn std_dev(samples: &[f64]) -> Option<f64> {
    let avg = mean(samples)?;
    let squares: f64 = samples.iter().map(|x| (x - avg).powi(2)).sum();
    Some((squares / samples.len() as f64).sqrt())
}

/// Mean and population standard deviation of one metric across trials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeanStd {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

impl MeanStd {
    pub fn of(samples: &[f64]) -> Option<Self> {
        Some(Self {
            mean: mean(samples)?,
            std_dev: std_dev(samples)?,
            samples: samples.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
        assert_eq!(min(&[]), None);
        assert_eq!(max(&[]), None);
        assert_eq!(sum(&[]), 0.0);
        assert!(MeanStd::of(&[]).is_none());
    }

    #[test]
    fn test_single_sample_has_zero_spread() {
        assert_eq!(std_dev(&[42.5]), Some(0.0));
        let summary = MeanStd::of(&[3.0]).unwrap();
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.std_dev, 0.0);
    }

    #[test]
    fn test_population_std_dev() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(mean(&samples), Some(2.5));
        let sd = std_dev(&samples).unwrap();
        assert!((sd - 1.25f64.sqrt()).abs() < 1e-12);
        assert!((sd - 1.1180339887).abs() < 1e-9);
    }

    #[test]
    fn test_min_max() {
        let samples = [3.0, -1.0, 7.5, 0.0];
        assert_eq!(min(&samples), Some(-1.0));
        assert_eq!(max(&samples), Some(7.5));
        assert_eq!(sum(&samples), 9.5);
    }
}
