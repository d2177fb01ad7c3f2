use crate::{sample_without_replacement, stream_rng};
use anyhow::{anyhow, Result};
use ghost_optimizer::StochasticOracle;
use ghost_structs::config::{
    EvaluationMode, HessianKind, LpOptions, OptimizerConfig, QpOptions, StepDecay,
};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Axis, IxDyn};
use rand::{rngs::SmallRng, Rng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Fraction of samples in the protected group.
const PROTECTED_SHARE: f64 = 0.3;
/// Target offset of the protected group that a linear model without the
/// group attribute cannot represent.
const GROUP_SHIFT: f64 = 1.5;
const LABEL_NOISE: f64 = 0.5;
/// Largest minibatch the level sampler may request.
const MAX_BATCH: usize = 64;
/// Slack on top of the allowed loss gap when verifying a solution.
pub const GAP_TOLERANCE: f64 = 0.1;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Difficulty {
    pub num_samples: usize,
    pub num_features: usize,
    /// Allowed difference between the two group losses, in percent.
    pub gap_percent: u32,
}

impl TryFrom<Vec<i32>> for Difficulty {
    type Error = anyhow::Error;

    fn try_from(arr: Vec<i32>) -> Result<Self> {
        match arr.as_slice() {
            &[num_samples, num_features, gap_percent]
                if num_samples >= 10 && num_features > 0 && gap_percent >= 0 =>
            {
                Ok(Self {
                    num_samples: num_samples as usize,
                    num_features: num_features as usize,
                    gap_percent: gap_percent as u32,
                })
            }
            _ => Err(anyhow!(
                "Invalid difficulty {:?}. Expected [num_samples >= 10, num_features > 0, gap_percent >= 0]",
                arr
            )),
        }
    }
}

impl From<Difficulty> for Vec<i32> {
    fn from(d: Difficulty) -> Self {
        vec![
            d.num_samples as i32,
            d.num_features as i32,
            d.gap_percent as i32,
        ]
    }
}

/// Least-squares regression whose group losses must stay within `max_gap`
/// of each other:
///
/// ```text
/// min  L(w, b)   s.t.  L_0(w, b) - L_1(w, b) <= max_gap
///                      L_1(w, b) - L_0(w, b) <= max_gap
/// ```
///
/// Parameters are two tensors, the weights `[num_features]` and the bias `[1]`.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub seed: [u8; 32],
    pub difficulty: Difficulty,
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
    pub protected: Vec<bool>,
    /// Sample indices of the unprotected and protected group.
    pub groups: [Vec<usize>; 2],
    all: Vec<usize>,
}

impl Challenge {
    pub fn generate_instance(seed: &[u8; 32], difficulty: &Difficulty) -> Result<Self> {
        let mut rng = stream_rng(seed, "instance");
        let (n, d) = (difficulty.num_samples, difficulty.num_features);

        let features = Array2::from_shape_fn((n, d), |_| rng.sample::<f64, _>(StandardNormal));
        let weights = Array1::from_shape_fn(d, |_| rng.sample::<f64, _>(StandardNormal));
        let bias: f64 = rng.gen_range(-1.0..1.0);
        let protected: Vec<bool> = (0..n).map(|_| rng.gen_bool(PROTECTED_SHARE)).collect();
        let targets = Array1::from_shape_fn(n, |i| {
            let noise: f64 = rng.sample(StandardNormal);
            let shift = if protected[i] { GROUP_SHIFT } else { 0.0 };
            features.row(i).dot(&weights) + bias + shift + LABEL_NOISE * noise
        });

        let groups = [
            (0..n).filter(|&i| !protected[i]).collect::<Vec<_>>(),
            (0..n).filter(|&i| protected[i]).collect::<Vec<_>>(),
        ];
        if groups.iter().any(|g| g.is_empty()) {
            return Err(anyhow!("Instance has an empty group; increase num_samples"));
        }

        Ok(Self {
            seed: *seed,
            difficulty: *difficulty,
            features,
            targets,
            protected,
            groups,
            all: (0..n).collect(),
        })
    }

    pub fn max_gap(&self) -> f64 {
        self.difficulty.gap_percent as f64 / 100.0
    }

    pub fn num_params(&self) -> usize {
        self.difficulty.num_features + 1
    }

    pub fn initial_params(&self) -> Vec<ArrayD<f64>> {
        vec![
            ArrayD::zeros(IxDyn(&[self.difficulty.num_features])),
            ArrayD::zeros(IxDyn(&[1])),
        ]
    }

    pub fn oracle(&self) -> Result<Oracle<'_>> {
        Ok(Oracle {
            challenge: self,
            rng: Mutex::new(stream_rng(&self.seed, "oracle")),
            full_batch: false,
        })
    }

    /// Oracle that ignores the batch size and always evaluates the full data,
    /// turning the run into deterministic SQP.
    pub fn exact_oracle(&self) -> Oracle<'_> {
        Oracle {
            challenge: self,
            rng: Mutex::new(stream_rng(&self.seed, "oracle")),
            full_batch: true,
        }
    }

    pub fn default_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            max_iter: 2000,
            beta: 1.0,
            rho: 1.0,
            lambda: 0.5,
            hessian: HessianKind::Diag,
            tau: 1.0,
            minibatch_size: 64,
            num_constraints: 2,
            geom_p: 0.3,
            step_decay: StepDecay::SlowDiminishing,
            gamma_zero: 0.05,
            zeta: 0.5,
            dataset_size: self.difficulty.num_samples.min(MAX_BATCH),
            num_params: self.num_params(),
            loss_bound: vec![self.max_gap(); 2],
            evaluation_mode: EvaluationMode::Sequential,
            lp: LpOptions::default(),
            qp: QpOptions::default(),
        }
    }

    fn unpack<'p>(&self, params: &'p [ArrayD<f64>]) -> Result<(ArrayView1<'p, f64>, f64)> {
        let d = self.difficulty.num_features;
        match params {
            [w, b] if w.shape() == &[d] && b.shape() == &[1] => {
                let w = w
                    .view()
                    .into_dimensionality()
                    .map_err(|e| anyhow!("Weights: {}", e))?;
                Ok((w, b.iter().next().copied().unwrap_or_default()))
            }
            _ => Err(anyhow!(
                "Expected tensors of shape [{}] and [1], got shapes {:?}",
                d,
                params.iter().map(|p| p.shape().to_vec()).collect::<Vec<_>>()
            )),
        }
    }

    fn residuals(&self, w: ArrayView1<f64>, b: f64, indices: &[usize]) -> Array1<f64> {
        let x = self.features.select(Axis(0), indices);
        let y = self.targets.select(Axis(0), indices);
        x.dot(&w) + b - y
    }

    /// Mean squared error over `indices`.
    fn loss(&self, w: ArrayView1<f64>, b: f64, indices: &[usize]) -> f64 {
        let r = self.residuals(w, b, indices);
        r.dot(&r) / indices.len().max(1) as f64
    }

    fn loss_gradient(&self, w: ArrayView1<f64>, b: f64, indices: &[usize]) -> (Array1<f64>, f64) {
        let scale = 2.0 / indices.len().max(1) as f64;
        let r = self.residuals(w, b, indices);
        let x = self.features.select(Axis(0), indices);
        (x.t().dot(&r) * scale, r.sum() * scale)
    }

    /// Mean squared error over the full dataset.
    pub fn objective(&self, params: &[ArrayD<f64>]) -> Result<f64> {
        let (w, b) = self.unpack(params)?;
        Ok(self.loss(w, b, &self.all))
    }

    /// Full-data losses of the unprotected and protected group.
    pub fn group_losses(&self, params: &[ArrayD<f64>]) -> Result<[f64; 2]> {
        let (w, b) = self.unpack(params)?;
        Ok([
            self.loss(w, b, &self.groups[0]),
            self.loss(w, b, &self.groups[1]),
        ])
    }

    pub fn verify_solution(&self, params: &[ArrayD<f64>]) -> Result<()> {
        let (w, b) = self.unpack(params)?;
        if !b.is_finite() || w.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Parameters are not finite"));
        }
        let [l0, l1] = self.group_losses(params)?;
        let gap = (l0 - l1).abs();
        if gap > self.max_gap() + GAP_TOLERANCE {
            return Err(anyhow!(
                "Group loss gap {:.4} exceeds {:.4}",
                gap,
                self.max_gap() + GAP_TOLERANCE
            ));
        }
        let mean = self.targets.mean().unwrap_or_default();
        let baseline = self.targets.mapv(|y| (y - mean).powi(2)).mean().unwrap_or_default();
        let mse = self.loss(w, b, &self.all);
        if mse > baseline {
            return Err(anyhow!(
                "Mean squared error {:.4} is worse than the constant predictor ({:.4})",
                mse,
                baseline
            ));
        }
        Ok(())
    }
}

/// Minibatches are drawn without replacement; a batch at least as large as
/// its pool uses the whole pool. Constraint estimates draw `batch_size`
/// samples from each group.
pub struct Oracle<'a> {
    challenge: &'a Challenge,
    rng: Mutex<SmallRng>,
    full_batch: bool,
}

impl Oracle<'_> {
    fn draw(&self, pool: &[usize], batch_size: usize) -> Result<Vec<usize>> {
        if self.full_batch {
            return Ok(pool.to_vec());
        }
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| anyhow!("Sampling generator poisoned"))?;
        Ok(sample_without_replacement(&mut *rng, pool, batch_size.max(1)))
    }

    fn sign(i: usize) -> Result<f64> {
        match i {
            0 => Ok(1.0),
            1 => Ok(-1.0),
            _ => Err(anyhow!("Constraint index {} out of range", i)),
        }
    }
}

impl StochasticOracle for Oracle<'_> {
    fn num_constraints(&self) -> usize {
        2
    }

    fn objective_value(&self, params: &[ArrayD<f64>], batch_size: usize) -> Result<f64> {
        let (w, b) = self.challenge.unpack(params)?;
        let batch = self.draw(&self.challenge.all, batch_size)?;
        Ok(self.challenge.loss(w, b, &batch))
    }

    fn objective_gradient(
        &self,
        params: &[ArrayD<f64>],
        batch_size: usize,
    ) -> Result<Vec<ArrayD<f64>>> {
        let (w, b) = self.challenge.unpack(params)?;
        let batch = self.draw(&self.challenge.all, batch_size)?;
        let (gw, gb) = self.challenge.loss_gradient(w, b, &batch);
        Ok(vec![gw.into_dyn(), Array1::from_elem(1, gb).into_dyn()])
    }

    fn constraint_value(&self, i: usize, params: &[ArrayD<f64>], batch_size: usize) -> Result<f64> {
        let sign = Self::sign(i)?;
        let (w, b) = self.challenge.unpack(params)?;
        let [g0, g1] = &self.challenge.groups;
        let l0 = self.challenge.loss(w, b, &self.draw(g0, batch_size)?);
        let l1 = self.challenge.loss(w, b, &self.draw(g1, batch_size)?);
        Ok(sign * (l0 - l1))
    }

    fn constraint_gradient(
        &self,
        i: usize,
        params: &[ArrayD<f64>],
        batch_size: usize,
    ) -> Result<Vec<ArrayD<f64>>> {
        let sign = Self::sign(i)?;
        let (w, b) = self.challenge.unpack(params)?;
        let [g0, g1] = &self.challenge.groups;
        let (gw0, gb0) = self.challenge.loss_gradient(w, b, &self.draw(g0, batch_size)?);
        let (gw1, gb1) = self.challenge.loss_gradient(w, b, &self.draw(g1, batch_size)?);
        Ok(vec![
            ((gw0 - gw1) * sign).into_dyn(),
            Array1::from_elem(1, sign * (gb0 - gb1)).into_dyn(),
        ])
    }
}
