// crates/worker-sim/src/schedule.rs
//! DDPM-style noise schedules. The simulator uses them only to attach
//! plausible `beta` and `Cosine` values to the frames it emits.

use noisescope_core::{ScheduleKind, MAX_STEPS, MIN_STEPS};
use thiserror::Error;

/// Offset of the cosine schedule (Nichol & Dhariwal).
const COSINE_S: f64 = 8e-3;
const BETA_MIN: f64 = 1e-8;
const BETA_MAX: f64 = 0.999;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("steps must be in [{MIN_STEPS}, {MAX_STEPS}], got {0}")]
    StepsOutOfRange(u32),
    #[error("beta bounds must lie in [1e-8, 0.5], got {start}..{end}")]
    BoundsOutOfRange { start: f64, end: f64 },
}

#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    beta: Vec<f64>,
    alpha_bar: Vec<f64>,
}

impl NoiseSchedule {
    pub fn build(
        steps: u32,
        kind: ScheduleKind,
        beta_start: f64,
        beta_end: f64,
    ) -> Result<Self, ScheduleError> {
        if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
            return Err(ScheduleError::StepsOutOfRange(steps));
        }
        let in_range = |b: f64| (BETA_MIN..=0.5).contains(&b);
        if !in_range(beta_start) || !in_range(beta_end) {
            return Err(ScheduleError::BoundsOutOfRange {
                start: beta_start,
                end: beta_end,
            });
        }

        let n = steps as usize;
        let beta: Vec<f64> = match kind {
            ScheduleKind::Linear => linspace(beta_start, beta_end, n)
                .into_iter()
                .map(|b| b.clamp(BETA_MIN, BETA_MAX))
                .collect(),
            ScheduleKind::Cosine => cosine_betas(n),
        };

        let mut alpha_bar = Vec::with_capacity(n);
        let mut acc = 1.0;
        for b in &beta {
            acc *= 1.0 - b;
            alpha_bar.push(acc);
        }
        Ok(Self { beta, alpha_bar })
    }

    pub fn len(&self) -> usize {
        self.beta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beta.is_empty()
    }

    pub fn beta(&self, t: u32) -> f64 {
        self.beta[t as usize]
    }

    pub fn alpha_bar(&self, t: u32) -> f64 {
        self.alpha_bar[t as usize]
    }

    /// Cosine similarity between the source and the noised image at `t`,
    /// in expectation: the signal coefficient `sqrt(alpha_bar)`.
    pub fn expected_cosine(&self, t: u32) -> f64 {
        self.alpha_bar(t).sqrt()
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

fn cosine_betas(n: usize) -> Vec<f64> {
    let f = |u: f64| (((u + COSINE_S) / (1.0 + COSINE_S)) * std::f64::consts::FRAC_PI_2).cos().powi(2);
    let denom = f(0.0);
    let alpha_bar: Vec<f64> = (0..n)
        .map(|t| (f(t as f64 / n as f64) / denom).clamp(BETA_MIN, 1.0))
        .collect();

    let mut beta = Vec::with_capacity(n);
    beta.push(1.0 - alpha_bar[0]);
    for t in 1..n {
        beta.push(1.0 - alpha_bar[t] / alpha_bar[t - 1]);
    }
    beta.into_iter().map(|b| b.clamp(BETA_MIN, BETA_MAX)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_endpoints() {
        let s = NoiseSchedule::build(10, ScheduleKind::Linear, 1e-3, 2e-2).unwrap();
        assert_eq!(s.len(), 10);
        assert!((s.beta(0) - 1e-3).abs() < 1e-12);
        assert!((s.beta(9) - 2e-2).abs() < 1e-12);
    }

    #[test]
    fn test_alpha_bar_decreases() {
        for kind in [ScheduleKind::Linear, ScheduleKind::Cosine] {
            let s = NoiseSchedule::build(100, kind, 1e-3, 2e-2).unwrap();
            for t in 1..100 {
                assert!(s.alpha_bar(t) <= s.alpha_bar(t - 1), "{kind:?} at {t}");
            }
            assert!(s.expected_cosine(0) <= 1.0);
        }
    }

    #[test]
    fn test_single_step() {
        let s = NoiseSchedule::build(1, ScheduleKind::Linear, 1e-3, 2e-2).unwrap();
        assert_eq!(s.len(), 1);
        assert!((s.beta(0) - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert_eq!(
            NoiseSchedule::build(0, ScheduleKind::Linear, 1e-3, 2e-2).unwrap_err(),
            ScheduleError::StepsOutOfRange(0)
        );
        assert!(NoiseSchedule::build(1001, ScheduleKind::Cosine, 1e-3, 2e-2).is_err());
        assert!(NoiseSchedule::build(10, ScheduleKind::Linear, 0.0, 2e-2).is_err());
    }
}
