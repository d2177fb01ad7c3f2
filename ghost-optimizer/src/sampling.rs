use ghost_structs::config::ConfigError;
use rand::Rng;
use rand_distr::{Distribution, Geometric};

/// One accepted level draw of the multilevel estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelDraw {
    pub level: u32,
    /// `[1, 2^s, 2^s, 2^(s+1)]`
    pub batch_sizes: [usize; 4],
    /// `1 / (p (1 - p)^s)`, the inverse of the untruncated level probability.
    pub weight: f64,
    /// Draws rejected before this one was accepted.
    pub redraws: usize,
}

/// Draws the MLMC level `s` from a geometric law on `{0, 1, ...}` (number of
/// failures before the first success), rejecting levels whose largest
/// minibatch `2^(s+1)` would exceed the dataset.
#[derive(Debug, Clone)]
pub struct LevelSampler {
    p: f64,
    max_level: u32,
    geometric: Geometric,
}

impl LevelSampler {
    pub fn new(p: f64, dataset_size: usize) -> Result<Self, ConfigError> {
        let geometric = Geometric::new(p).map_err(|e| ConfigError::InvalidValue {
            field: "geom_p",
            reason: e.to_string(),
        })?;
        if !(p > 0.0 && p < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "geom_p",
                reason: format!("{} is outside (0, 1)", p),
            });
        }
        if dataset_size < 2 {
            return Err(ConfigError::InvalidValue {
                field: "dataset_size",
                reason: format!("{} leaves no admissible sampling level", dataset_size),
            });
        }
        Ok(Self {
            p,
            max_level: dataset_size.ilog2() - 1,
            geometric,
        })
    }

    /// Largest `s` with `2^(s+1) <= dataset_size`.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> LevelDraw {
        let mut redraws = 0;
        let level = loop {
            let s = self.geometric.sample(rng);
            if s <= self.max_level as u64 {
                break s as u32;
            }
            redraws += 1;
        };
        let half = 1usize << level;
        LevelDraw {
            level,
            batch_sizes: [1, half, half, half << 1],
            weight: 1.0 / (self.p * (1.0 - self.p).powi(level as i32)),
            redraws,
        }
    }

    /// Probability of accepting `level` under the truncated law.
    pub fn probability(&self, level: u32) -> f64 {
        if level > self.max_level {
            return 0.0;
        }
        let q = 1.0 - self.p;
        self.p * q.powi(level as i32) / (1.0 - q.powi(self.max_level as i32 + 1))
    }
}
