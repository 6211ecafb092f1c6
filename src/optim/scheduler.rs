//! Learning-rate schedule for the weight optimizer

use std::f64::consts::PI;

/// Cosine annealing from `base_lr` down to `min_lr` over `t_max` epochs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineAnnealing {
    base_lr: f64,
    min_lr: f64,
    t_max: usize,
}

impl CosineAnnealing {
    pub fn new(base_lr: f64, min_lr: f64, t_max: usize) -> Self {
        Self {
            base_lr,
            min_lr,
            t_max: t_max.max(1),
        }
    }

    /// Learning rate for a zero-based epoch; clamps at `min_lr` past `t_max`
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let progress = epoch.min(self.t_max) as f64 / self.t_max as f64;
        self.min_lr + (self.base_lr - self.min_lr) * 0.5 * (1.0 + (PI * progress).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_and_midpoint() {
        let s = CosineAnnealing::new(0.1, 0.001, 10);
        assert!((s.lr_at(0) - 0.1).abs() < 1e-12);
        assert!((s.lr_at(5) - 0.0505).abs() < 1e-12);
        assert!((s.lr_at(10) - 0.001).abs() < 1e-12);
        assert!((s.lr_at(25) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_decrease() {
        let s = CosineAnnealing::new(0.025, 0.0, 50);
        let lrs: Vec<f64> = (0..=50).map(|e| s.lr_at(e)).collect();
        assert!(lrs.windows(2).all(|w| w[1] <= w[0]));
    }
}
