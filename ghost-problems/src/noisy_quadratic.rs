use crate::stream_rng;
use anyhow::{anyhow, Result};
use ghost_optimizer::StochasticOracle;
use ghost_structs::config::{
    EvaluationMode, HessianKind, LpOptions, OptimizerConfig, QpOptions, StepDecay,
};
use ndarray::{Array1, ArrayD, IxDyn};
use rand::{rngs::SmallRng, Rng};
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Largest accepted violation of the linear constraint.
pub const FEASIBILITY_TOLERANCE: f64 = 0.1;
/// Largest accepted distance to the constrained minimizer.
pub const DISTANCE_TOLERANCE: f64 = 0.25;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct Difficulty {
    pub num_params: usize,
    /// Standard deviation of the single-sample gradient noise, in percent.
    pub noise_percent: u32,
}

impl TryFrom<Vec<i32>> for Difficulty {
    type Error = anyhow::Error;

    fn try_from(arr: Vec<i32>) -> Result<Self> {
        match arr.as_slice() {
            &[num_params, noise_percent] if num_params > 0 && noise_percent >= 0 => Ok(Self {
                num_params: num_params as usize,
                noise_percent: noise_percent as u32,
            }),
            _ => Err(anyhow!(
                "Invalid difficulty {:?}. Expected [num_params > 0, noise_percent >= 0]",
                arr
            )),
        }
    }
}

impl From<Difficulty> for Vec<i32> {
    fn from(d: Difficulty) -> Self {
        vec![d.num_params as i32, d.noise_percent as i32]
    }
}

/// `min 1/2 |w - center|^2  s.t.  normal . w <= offset`
///
/// The center always violates the constraint, so the minimizer is its
/// projection onto the boundary.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Challenge {
    pub seed: [u8; 32],
    pub difficulty: Difficulty,
    pub center: Vec<f64>,
    /// Unit normal of the constraint.
    pub normal: Vec<f64>,
    pub offset: f64,
}

impl Challenge {
    pub fn generate_instance(seed: &[u8; 32], difficulty: &Difficulty) -> Result<Self> {
        let mut rng = stream_rng(seed, "instance");
        let n = difficulty.num_params;

        let center: Vec<f64> = (0..n).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let mut normal: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
        let norm = normal.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Err(anyhow!("Degenerate constraint normal"));
        }
        normal.iter_mut().for_each(|v| *v /= norm);
        let margin: f64 = rng.gen_range(0.5..1.5);
        let offset = dot(&normal, &center) - margin;

        Ok(Self {
            seed: *seed,
            difficulty: *difficulty,
            center,
            normal,
            offset,
        })
    }

    pub fn noise_std(&self) -> f64 {
        self.difficulty.noise_percent as f64 / 100.0
    }

    pub fn initial_params(&self) -> Vec<ArrayD<f64>> {
        vec![ArrayD::zeros(IxDyn(&[self.difficulty.num_params]))]
    }

    pub fn oracle(&self) -> Result<Oracle<'_>> {
        Ok(Oracle {
            challenge: self,
            rng: Mutex::new(stream_rng(&self.seed, "oracle")),
            noise: Normal::new(0.0, self.noise_std())?,
        })
    }

    pub fn default_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            max_iter: 500,
            beta: 1.0,
            rho: 1.0,
            lambda: 0.5,
            hessian: HessianKind::Diag,
            tau: 1.0,
            minibatch_size: 16,
            num_constraints: 1,
            geom_p: 0.3,
            step_decay: StepDecay::Diminishing,
            gamma_zero: 1.0,
            zeta: 1.0,
            dataset_size: 1024,
            num_params: self.difficulty.num_params,
            loss_bound: vec![0.0],
            evaluation_mode: EvaluationMode::Sequential,
            lp: LpOptions::default(),
            qp: QpOptions::default(),
        }
    }

    pub fn minimizer(&self) -> Vec<f64> {
        let excess = dot(&self.normal, &self.center) - self.offset;
        self.center
            .iter()
            .zip(&self.normal)
            .map(|(c, a)| c - excess * a)
            .collect()
    }

    pub fn objective(&self, w: &[f64]) -> f64 {
        0.5 * w
            .iter()
            .zip(&self.center)
            .map(|(w, c)| (w - c).powi(2))
            .sum::<f64>()
    }

    pub fn constraint(&self, w: &[f64]) -> f64 {
        dot(&self.normal, w) - self.offset
    }

    pub fn verify_solution(&self, params: &[ArrayD<f64>]) -> Result<()> {
        let w = flatten(params, self.difficulty.num_params)?;
        if let Some(i) = w.iter().position(|v| !v.is_finite()) {
            return Err(anyhow!("Parameter {} is not finite", i));
        }
        let violation = self.constraint(&w);
        if violation > FEASIBILITY_TOLERANCE {
            return Err(anyhow!(
                "Constraint violated by {:.4} (tolerance {})",
                violation,
                FEASIBILITY_TOLERANCE
            ));
        }
        let distance = w
            .iter()
            .zip(self.minimizer())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        if distance > DISTANCE_TOLERANCE {
            return Err(anyhow!(
                "Distance to minimizer {:.4} exceeds {}",
                distance,
                DISTANCE_TOLERANCE
            ));
        }
        Ok(())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

fn flatten(params: &[ArrayD<f64>], n: usize) -> Result<Vec<f64>> {
    match params {
        [w] if w.shape() == &[n] => Ok(w.iter().cloned().collect()),
        _ => Err(anyhow!(
            "Expected a single tensor of shape [{}], got shapes {:?}",
            n,
            params.iter().map(|p| p.shape().to_vec()).collect::<Vec<_>>()
        )),
    }
}

/// Gradient noise is Gaussian with standard deviation `noise_std / sqrt(b)`
/// per coordinate; values carry the same noise. The constraint is exact.
pub struct Oracle<'a> {
    challenge: &'a Challenge,
    rng: Mutex<SmallRng>,
    noise: Normal<f64>,
}

impl Oracle<'_> {
    fn perturbation(&self, len: usize, batch_size: usize) -> Result<Array1<f64>> {
        let scale = 1.0 / (batch_size.max(1) as f64).sqrt();
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| anyhow!("Noise generator poisoned"))?;
        Ok(Array1::from_shape_fn(len, |_| {
            scale * self.noise.sample(&mut *rng)
        }))
    }
}

impl StochasticOracle for Oracle<'_> {
    fn num_constraints(&self) -> usize {
        1
    }

    fn objective_value(&self, w: &[ArrayD<f64>], batch_size: usize) -> Result<f64> {
        let w = flatten(w, self.challenge.difficulty.num_params)?;
        Ok(self.challenge.objective(&w) + self.perturbation(1, batch_size)?[0])
    }

    fn objective_gradient(&self, w: &[ArrayD<f64>], batch_size: usize) -> Result<Vec<ArrayD<f64>>> {
        let n = self.challenge.difficulty.num_params;
        let w = flatten(w, n)?;
        let noise = self.perturbation(n, batch_size)?;
        let grad = Array1::from_shape_fn(n, |i| w[i] - self.challenge.center[i] + noise[i]);
        Ok(vec![grad.into_dyn()])
    }

    fn constraint_value(&self, i: usize, w: &[ArrayD<f64>], _: usize) -> Result<f64> {
        if i != 0 {
            return Err(anyhow!("Constraint index {} out of range", i));
        }
        let w = flatten(w, self.challenge.difficulty.num_params)?;
        Ok(self.challenge.constraint(&w))
    }

    fn constraint_gradient(
        &self,
        i: usize,
        _: &[ArrayD<f64>],
        _: usize,
    ) -> Result<Vec<ArrayD<f64>>> {
        if i != 0 {
            return Err(anyhow!("Constraint index {} out of range", i));
        }
        Ok(vec![Array1::from_vec(self.challenge.normal.clone()).into_dyn()])
    }
}
