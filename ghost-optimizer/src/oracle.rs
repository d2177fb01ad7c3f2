use anyhow::{anyhow, Result};
use ndarray::ArrayD;

/// Noisy first-order access to the objective `f` and the constraints `c_i`.
///
/// Every call returns an estimate over a fresh minibatch of `batch_size`
/// samples. Estimates are expected to be unbiased and independent across
/// calls; the optimizer does not check this, and correlated or biased
/// minibatches silently degrade convergence.
///
/// Gradients are returned with the same tensor layout as `w`.
pub trait StochasticOracle: Sync {
    fn num_constraints(&self) -> usize;

    fn objective_value(&self, w: &[ArrayD<f64>], batch_size: usize) -> Result<f64>;

    fn objective_gradient(&self, w: &[ArrayD<f64>], batch_size: usize)
        -> Result<Vec<ArrayD<f64>>>;

    fn constraint_value(&self, i: usize, w: &[ArrayD<f64>], batch_size: usize) -> Result<f64>;

    fn constraint_gradient(
        &self,
        i: usize,
        w: &[ArrayD<f64>],
        batch_size: usize,
    ) -> Result<Vec<ArrayD<f64>>>;
}

pub type ValueFn = Box<dyn Fn(&[ArrayD<f64>], usize) -> Result<f64> + Send + Sync>;
pub type GradientFn = Box<dyn Fn(&[ArrayD<f64>], usize) -> Result<Vec<ArrayD<f64>>> + Send + Sync>;

/// Oracle assembled from plain functions: an objective, its gradient, and
/// one value/gradient pair per constraint.
pub struct FnOracle {
    objective: ValueFn,
    objective_grad: GradientFn,
    constraints: Vec<(ValueFn, GradientFn)>,
}

impl FnOracle {
    pub fn new<F, G>(objective: F, objective_grad: G) -> Self
    where
        F: Fn(&[ArrayD<f64>], usize) -> Result<f64> + Send + Sync + 'static,
        G: Fn(&[ArrayD<f64>], usize) -> Result<Vec<ArrayD<f64>>> + Send + Sync + 'static,
    {
        Self {
            objective: Box::new(objective),
            objective_grad: Box::new(objective_grad),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint<F, G>(mut self, value: F, grad: G) -> Self
    where
        F: Fn(&[ArrayD<f64>], usize) -> Result<f64> + Send + Sync + 'static,
        G: Fn(&[ArrayD<f64>], usize) -> Result<Vec<ArrayD<f64>>> + Send + Sync + 'static,
    {
        self.constraints.push((Box::new(value), Box::new(grad)));
        self
    }

    /// Builds the oracle from parallel lists of constraint functions and
    /// their gradients.
    pub fn from_parts(
        objective: ValueFn,
        objective_grad: GradientFn,
        constraint_fns: Vec<ValueFn>,
        constraint_grads: Vec<GradientFn>,
    ) -> Result<Self> {
        if constraint_fns.len() != constraint_grads.len() {
            return Err(anyhow!(
                "{} constraint functions but {} constraint gradients",
                constraint_fns.len(),
                constraint_grads.len()
            ));
        }
        Ok(Self {
            objective,
            objective_grad,
            constraints: constraint_fns.into_iter().zip(constraint_grads).collect(),
        })
    }

    fn constraint(&self, i: usize) -> Result<&(ValueFn, GradientFn)> {
        self.constraints.get(i).ok_or_else(|| {
            anyhow!(
                "constraint index {} out of range ({} constraints)",
                i,
                self.constraints.len()
            )
        })
    }
}

impl StochasticOracle for FnOracle {
    fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    fn objective_value(&self, w: &[ArrayD<f64>], batch_size: usize) -> Result<f64> {
        (self.objective)(w, batch_size)
    }

    fn objective_gradient(
        &self,
        w: &[ArrayD<f64>],
        batch_size: usize,
    ) -> Result<Vec<ArrayD<f64>>> {
        (self.objective_grad)(w, batch_size)
    }

    fn constraint_value(&self, i: usize, w: &[ArrayD<f64>], batch_size: usize) -> Result<f64> {
        (self.constraint(i)?.0)(w, batch_size)
    }

    fn constraint_gradient(
        &self,
        i: usize,
        w: &[ArrayD<f64>],
        batch_size: usize,
    ) -> Result<Vec<ArrayD<f64>>> {
        (self.constraint(i)?.1)(w, batch_size)
    }
}
