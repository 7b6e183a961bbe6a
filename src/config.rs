//! Training configuration.
//!
//! All knobs of the engine in one serializable struct. Defaults follow the
//! values commonly used for inward-facing photo captures; callers load or
//! persist the whole struct through serde.

use serde::{Deserialize, Serialize};

/// Per-parameter-group Adam learning rates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LearningRates {
    pub position: f32,
    pub rotation: f32,
    pub scale: f32,
    pub opacity: f32,
    pub color: f32,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            position: 1.6e-4,
            rotation: 1.0e-3,
            scale: 5.0e-3,
            opacity: 5.0e-2,
            color: 2.5e-3,
        }
    }
}

/// Shared Adam moment parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AdamParams {
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1.0e-8,
        }
    }
}

/// Loss mixing weights and SSIM stabilization constants.
///
/// The weights are not required to sum to 1; the trainer warns once at
/// construction when they do not.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LossWeights {
    pub l1: f32,
    pub l2: f32,
    pub dssim: f32,
    pub c1: f32,
    pub c2: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            l1: 0.8,
            l2: 0.0,
            dssim: 0.2,
            c1: 0.01 * 0.01,
            c2: 0.03 * 0.03,
        }
    }
}

impl LossWeights {
    pub fn sum(&self) -> f32 {
        self.l1 + self.l2 + self.dssim
    }
}

/// When densification runs: first at `warmup`, then every `interval`
/// iterations, never at or after `stop`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DensifySchedule {
    pub warmup: u32,
    pub interval: u32,
    pub stop: u32,
}

impl Default for DensifySchedule {
    fn default() -> Self {
        Self {
            warmup: 500,
            interval: 100,
            stop: 15_000,
        }
    }
}

impl DensifySchedule {
    /// The next iteration at or after `iteration` on which densification
    /// runs, or `None` once the schedule has stopped.
    pub fn next_after(&self, iteration: u32) -> Option<u32> {
        if self.interval == 0 || iteration >= self.stop {
            return None;
        }
        let next = if iteration < self.warmup {
            self.warmup
        } else {
            let since = iteration - self.warmup;
            self.warmup + (since / self.interval + 1) * self.interval
        };
        (next < self.stop).then_some(next)
    }

    pub fn is_due(&self, iteration: u32) -> bool {
        if self.interval == 0 || iteration < self.warmup || iteration >= self.stop {
            return false;
        }
        (iteration - self.warmup) % self.interval == 0
    }
}

/// How densification scores Gaussians: error masks are accumulated over
/// `views` random views rendered at `downscale`; pixels whose normalized
/// error exceeds `threshold` vote for every Gaussian that touches them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MetricConfig {
    pub views: u32,
    pub downscale: f32,
    pub threshold: f32,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            views: 4,
            downscale: 1.0,
            threshold: 0.6,
        }
    }
}

/// Full training configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Termination condition for `Trainer::train`.
    pub max_iterations: u32,

    pub learning_rates: LearningRates,
    pub adam: AdamParams,
    pub loss: LossWeights,
    pub densify: DensifySchedule,
    pub metric: MetricConfig,

    /// Gaussians below this opacity (after sigmoid) are pruned.
    pub prune_opacity: f32,

    /// Influence-count threshold at which a Gaussian is cloned or split.
    pub clone_threshold_count: u32,

    /// A clone candidate whose largest world-space extent reaches this value
    /// is split instead.
    pub split_scale_threshold: f32,

    /// Hard cap on Gaussians added by a single densification step.
    pub max_new_points_per_step: u32,

    /// Byte budget for the Gaussian store plus all optimizer state. The
    /// densify cap converts the overflowing tail to keep/prune so the
    /// scatter can never exceed it.
    pub max_buffer_bytes: u64,

    /// Active spherical-harmonic degree, 0..=3.
    pub sh_degree: u32,

    /// Background color composited under the splat stack.
    pub background: [f32; 3],

    /// Seed for the host-side view sampler and the in-shader hash.
    pub seed: u64,

    /// Screen-space radius (pixels) past which scale growth is suppressed.
    /// Zero disables the cap.
    pub max_radius_px: f32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30_000,
            learning_rates: LearningRates::default(),
            adam: AdamParams::default(),
            loss: LossWeights::default(),
            densify: DensifySchedule::default(),
            metric: MetricConfig::default(),
            prune_opacity: 0.005,
            clone_threshold_count: 50,
            split_scale_threshold: 0.01,
            max_new_points_per_step: 100_000,
            max_buffer_bytes: 2 * 1024 * 1024 * 1024,
            sh_degree: 3,
            background: [0.0, 0.0, 0.0],
            seed: 0,
            max_radius_px: 512.0,
        }
    }
}

impl TrainerConfig {
    /// Bytes of GPU state per Gaussian: packed store + packed SH + optimizer
    /// state for every parameter group.
    pub const BYTES_PER_POINT: u64 = 24 + 96 + 3 * 48 + 12 + 192 + 384;

    /// The most Gaussians the byte budget can hold.
    pub fn max_points(&self) -> u64 {
        self.max_buffer_bytes / Self::BYTES_PER_POINT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_densify_schedule_next() {
        let s = DensifySchedule {
            warmup: 500,
            interval: 100,
            stop: 1000,
        };
        assert_eq!(s.next_after(0), Some(500));
        assert_eq!(s.next_after(499), Some(500));
        assert_eq!(s.next_after(500), Some(600));
        assert_eq!(s.next_after(650), Some(700));
        assert_eq!(s.next_after(901), None, "next would be 1000 = stop");
        assert_eq!(s.next_after(1000), None);
    }

    #[test]
    fn test_densify_schedule_due() {
        let s = DensifySchedule {
            warmup: 500,
            interval: 100,
            stop: 1000,
        };
        assert!(!s.is_due(0));
        assert!(!s.is_due(499));
        assert!(s.is_due(500));
        assert!(!s.is_due(550));
        assert!(s.is_due(900));
        assert!(!s.is_due(1000));
    }

    #[test]
    fn test_max_points_from_budget() {
        let mut cfg = TrainerConfig::default();
        cfg.max_buffer_bytes = TrainerConfig::BYTES_PER_POINT * 1234;
        assert_eq!(cfg.max_points(), 1234);
    }

    #[test]
    fn test_loss_weight_sum() {
        let w = LossWeights::default();
        approx::assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-6);
    }
}
