use crate::{
    error::{evaluation_error, FailureContext, GhostError, OracleCall, Result},
    hessian::{self, HessianApprox},
    kappa::KappaSolver,
    layout::ParamLayout,
    oracle::StochasticOracle,
    sampling::{LevelDraw, LevelSampler},
    stepsize::StepSchedule,
    subproblem::{QpError, StepSubproblem},
};
use anyhow::anyhow;
use ghost_structs::{
    config::{ConfigError, EvaluationMode, OptimizerConfig},
    core::{IterationRecord, Trajectory},
};
use log::{debug, info};
use logging_timer::time;
use ndarray::{Array1, Array2, ArrayD};
use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    Iterating { iteration: usize },
    Terminated,
}

/// Gradient, constraint values and Jacobian from one minibatch, flattened.
/// Constraint values are shifted by their loss bounds.
#[derive(Debug, Clone)]
pub struct Linearization {
    pub fgrad: Array1<f64>,
    pub cval: Array1<f64>,
    pub cgrad: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct SampledStep {
    pub draw: LevelDraw,
    pub kappas: [f64; 4],
    /// `d0 + (d3 - d1/2 - d2/2) / (p (1 - p)^s)`
    pub direction: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub params: Vec<ArrayD<f64>>,
    pub trajectory: Trajectory,
}

pub struct StochasticGhost<'a, O: StochasticOracle + ?Sized> {
    oracle: &'a O,
    config: OptimizerConfig,
    layout: ParamLayout,
    params: Vec<ArrayD<f64>>,
    loss_bound: Array1<f64>,
    rng: StdRng,
    sampler: LevelSampler,
    schedule: StepSchedule,
    hessian: Box<dyn HessianApprox>,
    kappa: KappaSolver,
    state: DriverState,
    trajectory: Trajectory,
}

impl<'a, O: StochasticOracle + ?Sized> StochasticGhost<'a, O> {
    pub fn new(
        oracle: &'a O,
        initw: Vec<ArrayD<f64>>,
        config: OptimizerConfig,
        seed: [u8; 32],
    ) -> Result<Self> {
        config.validate()?;
        let layout = ParamLayout::from_params(&initw);
        if layout.len() != config.num_params {
            return Err(ConfigError::Mismatch {
                what: "flattened parameter length vs num_params",
                expected: config.num_params,
                found: layout.len(),
            }
            .into());
        }
        if oracle.num_constraints() != config.num_constraints {
            return Err(ConfigError::Mismatch {
                what: "oracle constraint count vs num_constraints",
                expected: config.num_constraints,
                found: oracle.num_constraints(),
            }
            .into());
        }
        let sampler = LevelSampler::new(config.geom_p, config.dataset_size)?;
        Ok(Self {
            oracle,
            layout,
            params: initw,
            loss_bound: Array1::from_vec(config.loss_bound.clone()),
            rng: StdRng::from_seed(seed),
            sampler,
            schedule: StepSchedule::new(config.step_decay, config.gamma_zero, config.zeta),
            hessian: hessian::from_kind(config.hessian, config.tau),
            kappa: KappaSolver::new(config.rho, config.lambda, config.lp.clone()),
            state: DriverState::Initializing,
            trajectory: Trajectory::with_capacity(config.max_iter),
            config,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn params(&self) -> &[ArrayD<f64>] {
        &self.params
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn context(&self) -> FailureContext {
        FailureContext::at_iteration(self.trajectory.len())
    }

    /// Evaluates the oracle at the current parameters with one minibatch.
    pub fn linearize(&self, batch_size: usize, context: FailureContext) -> Result<Linearization> {
        let oracle = self.oracle;
        let params = self.params.as_slice();
        let n = self.layout.len();
        let m = self.config.num_constraints;

        let grad = oracle
            .objective_gradient(params, batch_size)
            .map_err(|e| evaluation_error(OracleCall::ObjectiveGradient, context, e))?;
        let fgrad = self
            .layout
            .pack(&grad)
            .map_err(|e| evaluation_error(OracleCall::ObjectiveGradient, context, e))?;
        if fgrad.iter().any(|v| !v.is_finite()) {
            return Err(evaluation_error(
                OracleCall::ObjectiveGradient,
                context,
                anyhow!("non-finite gradient entry"),
            ));
        }

        let mut cval = Array1::zeros(m);
        let mut cgrad = Array2::zeros((m, n));
        for i in 0..m {
            let context = context.with_constraint(i);
            let value = oracle
                .constraint_value(i, params, batch_size)
                .map_err(|e| evaluation_error(OracleCall::ConstraintValue, context, e))?;
            if !value.is_finite() {
                return Err(evaluation_error(
                    OracleCall::ConstraintValue,
                    context,
                    anyhow!("non-finite value {}", value),
                ));
            }
            cval[i] = value - self.loss_bound[i];

            let grad = oracle
                .constraint_gradient(i, params, batch_size)
                .map_err(|e| evaluation_error(OracleCall::ConstraintGradient, context, e))?;
            self.layout
                .pack_into(&grad, cgrad.row_mut(i))
                .map_err(|e| evaluation_error(OracleCall::ConstraintGradient, context, e))?;
            if cgrad.row(i).iter().any(|v| !v.is_finite()) {
                return Err(evaluation_error(
                    OracleCall::ConstraintGradient,
                    context,
                    anyhow!("non-finite gradient entry"),
                ));
            }
        }
        Ok(Linearization { fgrad, cval, cgrad })
    }

    /// Kappa and QP step for one minibatch.
    fn solve_direction(
        &self,
        batch_size: usize,
        context: FailureContext,
    ) -> Result<(f64, Array1<f64>)> {
        let lin = self.linearize(batch_size, context)?;
        let estimate = self
            .kappa
            .solve(lin.cval.view(), lin.cgrad.view())
            .map_err(|source| GhostError::LpInfeasible { context, source })?;
        let subproblem = StepSubproblem {
            fgrad: lin.fgrad.view(),
            cval: lin.cval.view(),
            cgrad: lin.cgrad.view(),
            kappa: estimate.kappa,
            beta: self.config.beta,
        };
        let direction = subproblem
            .solve(self.hessian.as_ref(), &self.config.qp)
            .map_err(|source| {
                let context = match source {
                    QpError::Infeasible { constraint, .. } => context.with_constraint(constraint),
                    _ => context,
                };
                GhostError::QpInfeasible { context, source }
            })?;
        Ok((estimate.kappa, direction))
    }

    /// Draws a level and assembles the multilevel step direction at the
    /// current parameters without applying it.
    pub fn sample_direction(&mut self) -> Result<SampledStep> {
        let draw = self.sampler.sample(&mut self.rng);
        let context = self.context();
        let this = &*self;
        let solved = match this.config.evaluation_mode {
            EvaluationMode::Sequential => draw
                .batch_sizes
                .iter()
                .enumerate()
                .map(|(j, &b)| this.solve_direction(b, context.with_evaluation(j)))
                .collect::<Result<Vec<_>>>()?,
            EvaluationMode::Parallel => draw
                .batch_sizes
                .par_iter()
                .enumerate()
                .map(|(j, &b)| this.solve_direction(b, context.with_evaluation(j)))
                .collect::<Result<Vec<_>>>()?,
        };

        let mut kappas = [0.0; 4];
        for (k, (kappa, _)) in kappas.iter_mut().zip(&solved) {
            *k = *kappa;
        }
        let [d0, d1, d2, d3] = [&solved[0].1, &solved[1].1, &solved[2].1, &solved[3].1];
        let correction = d3 - &(d1 * 0.5) - &(d2 * 0.5);
        let direction = d0 + &(correction * draw.weight);
        Ok(SampledStep {
            draw,
            kappas,
            direction,
        })
    }

    /// Objective and largest constraint value at the minibatch size of the
    /// configuration.
    fn diagnostics(&self, context: FailureContext) -> Result<(f64, f64)> {
        let batch_size = self.config.minibatch_size;
        let objective = self
            .oracle
            .objective_value(&self.params, batch_size)
            .map_err(|e| evaluation_error(OracleCall::ObjectiveValue, context, e))?;
        let mut max_constraint = f64::NEG_INFINITY;
        for i in 0..self.config.num_constraints {
            let value = self
                .oracle
                .constraint_value(i, &self.params, batch_size)
                .map_err(|e| {
                    evaluation_error(OracleCall::ConstraintValue, context.with_constraint(i), e)
                })?;
            max_constraint = max_constraint.max(value - self.loss_bound[i]);
        }
        if self.config.num_constraints == 0 {
            max_constraint = 0.0;
        }
        Ok((objective, max_constraint))
    }

    /// Runs one iteration. Returns `None` once `max_iter` iterations are done.
    pub fn step(&mut self) -> Result<Option<IterationRecord>> {
        let iteration = self.trajectory.len();
        if iteration >= self.config.max_iter {
            self.state = DriverState::Terminated;
            return Ok(None);
        }
        self.state = DriverState::Iterating { iteration };

        let gamma = self.schedule.gamma(iteration);
        let sampled = self.sample_direction()?;
        self.layout.axpy(&mut self.params, gamma, &sampled.direction)?;
        let (objective, max_constraint) = self.diagnostics(self.context())?;

        let record = IterationRecord {
            iteration,
            gamma,
            level: sampled.draw.level,
            kappas: sampled.kappas,
            step_norm: sampled.direction.dot(&sampled.direction).sqrt(),
            objective,
            max_constraint,
        };
        debug!(
            "iteration {}: gamma {:.3e}, level {} ({} redraws), kappas {:?}, |d| {:.3e}, f {:.6e}, max c {:.3e}",
            iteration,
            gamma,
            record.level,
            sampled.draw.redraws,
            record.kappas,
            record.step_norm,
            objective,
            max_constraint
        );
        self.trajectory.push(record.clone());
        if self.trajectory.len() >= self.config.max_iter {
            self.state = DriverState::Terminated;
        }
        Ok(Some(record))
    }

    pub fn run(mut self) -> Result<Outcome> {
        info!(
            "starting stochastic ghost: {} iterations, {} parameters in {} tensors, {} constraints, {} stepsize",
            self.config.max_iter,
            self.layout.len(),
            self.layout.num_tensors(),
            self.config.num_constraints,
            self.config.step_decay
        );
        while self.step()?.is_some() {}
        self.state = DriverState::Terminated;
        info!(
            "finished after {} iterations: f {:?}, max c {:?}",
            self.trajectory.len(),
            self.trajectory.iterfs().last(),
            self.trajectory.itercs().last()
        );
        Ok(Outcome {
            params: self.params,
            trajectory: self.trajectory,
        })
    }
}

#[time]
pub fn optimize<O: StochasticOracle + ?Sized>(
    oracle: &O,
    initw: Vec<ArrayD<f64>>,
    config: OptimizerConfig,
    seed: [u8; 32],
) -> Result<Outcome> {
    StochasticGhost::new(oracle, initw, config, seed)?.run()
}

/// Returns `(w_final, iterfs, itercs)`.
pub fn stochastic_ghost<O: StochasticOracle + ?Sized>(
    oracle: &O,
    initw: Vec<ArrayD<f64>>,
    config: OptimizerConfig,
    seed: [u8; 32],
) -> Result<(Vec<ArrayD<f64>>, Vec<f64>, Vec<f64>)> {
    let outcome = optimize(oracle, initw, config, seed)?;
    let Trajectory {
        objective,
        constraint,
        ..
    } = outcome.trajectory;
    Ok((outcome.params, objective, constraint))
}
