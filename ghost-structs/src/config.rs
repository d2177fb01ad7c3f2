use crate::serializable_struct_with_getters;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("loss_bound has {found} entries but num_constraints is {expected}")]
    LossBoundLength { expected: usize, found: usize },
    #[error("{what}: expected {expected}, found {found}")]
    Mismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Stepsize decay policy applied at the start of every iteration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecay {
    /// `gamma = gamma_zero / (t + 1)^zeta`
    #[serde(rename = "dimin", alias = "diminishing")]
    Diminishing,
    #[serde(rename = "constant")]
    Constant,
    /// `gamma_t = gamma_{t-1} * (1 - zeta * gamma_{t-1})`
    #[serde(rename = "slowdimin", alias = "slow-diminishing")]
    SlowDiminishing,
    /// `gamma = gamma_zero / 10^floor(t * zeta)`
    #[serde(rename = "stepwise")]
    Stepwise,
}

impl std::fmt::Display for StepDecay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepDecay::Diminishing => write!(f, "dimin"),
            StepDecay::Constant => write!(f, "constant"),
            StepDecay::SlowDiminishing => write!(f, "slowdimin"),
            StepDecay::Stepwise => write!(f, "stepwise"),
        }
    }
}

impl std::str::FromStr for StepDecay {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dimin" | "diminishing" => Ok(StepDecay::Diminishing),
            "constant" => Ok(StepDecay::Constant),
            "slowdimin" | "slow-diminishing" => Ok(StepDecay::SlowDiminishing),
            "stepwise" => Ok(StepDecay::Stepwise),
            _ => Err(ConfigError::InvalidValue {
                field: "step_decay",
                reason: format!("unknown policy '{}'", s),
            }),
        }
    }
}

/// Hessian model used by the step subproblem. Only the scaled identity
/// (`tau * I`) is available.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HessianKind {
    #[default]
    #[serde(rename = "diag", alias = "identity")]
    Diag,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationMode {
    #[default]
    #[serde(rename = "sequential")]
    Sequential,
    /// The four minibatch evaluations of an iteration run on worker threads.
    #[serde(rename = "parallel")]
    Parallel,
}

serializable_struct_with_getters! {
    LpOptions {
        /// Basis changes allowed across both simplex phases. Bound flips are
        /// not counted.
        max_iter: usize,
        tol: f64,
    }
}

impl Default for LpOptions {
    fn default() -> Self {
        Self {
            max_iter: 10_000,
            tol: 1e-9,
        }
    }
}

serializable_struct_with_getters! {
    QpOptions {
        max_iter: usize,
        /// Relative complementarity at which the subproblem counts as solved.
        tol: f64,
        /// Largest accepted violation of the linearized constraints.
        feas_tol: f64,
    }
}

impl Default for QpOptions {
    fn default() -> Self {
        Self {
            max_iter: 20_000,
            tol: 1e-10,
            feas_tol: 1e-7,
        }
    }
}

serializable_struct_with_getters! {
    OptimizerConfig {
        #[serde(alias = "maxiter")]
        max_iter: usize,
        beta: f64,
        rho: f64,
        #[serde(alias = "lamb")]
        lambda: f64,
        #[serde(alias = "hess", default)]
        hessian: HessianKind,
        tau: f64,
        #[serde(alias = "mbsz")]
        minibatch_size: usize,
        #[serde(alias = "numcon")]
        num_constraints: usize,
        #[serde(alias = "geomp")]
        geom_p: f64,
        #[serde(alias = "stepdecay")]
        step_decay: StepDecay,
        #[serde(alias = "gammazero")]
        gamma_zero: f64,
        zeta: f64,
        #[serde(alias = "N")]
        dataset_size: usize,
        #[serde(alias = "n")]
        num_params: usize,
        #[serde(alias = "lossbound")]
        loss_bound: Vec<f64>,
        #[serde(default)]
        evaluation_mode: EvaluationMode,
        #[serde(default)]
        lp: LpOptions,
        #[serde(default)]
        qp: QpOptions,
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(invalid("beta", format!("{} is not a positive radius", self.beta)));
        }
        if !(self.rho.is_finite() && self.rho >= 0.0) {
            return Err(invalid("rho", format!("{} is not a non-negative radius", self.rho)));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(invalid("lambda", format!("{} is outside [0, 1]", self.lambda)));
        }
        if !(self.tau.is_finite() && self.tau > 0.0) {
            return Err(invalid("tau", format!("{} is not positive", self.tau)));
        }
        if self.minibatch_size == 0 {
            return Err(invalid("minibatch_size", "must be at least 1"));
        }
        if !(self.geom_p > 0.0 && self.geom_p < 1.0) {
            return Err(invalid("geom_p", format!("{} is outside (0, 1)", self.geom_p)));
        }
        if !(self.gamma_zero.is_finite() && self.gamma_zero > 0.0) {
            return Err(invalid(
                "gamma_zero",
                format!("{} is not positive", self.gamma_zero),
            ));
        }
        if !(self.zeta.is_finite() && self.zeta >= 0.0) {
            return Err(invalid("zeta", format!("{} is not non-negative", self.zeta)));
        }
        // smallest level s = 0 already needs a batch of 2
        if self.dataset_size < 2 {
            return Err(invalid(
                "dataset_size",
                format!("{} leaves no admissible sampling level", self.dataset_size),
            ));
        }
        if self.num_params == 0 {
            return Err(invalid("num_params", "must be at least 1"));
        }
        if self.loss_bound.len() != self.num_constraints {
            return Err(ConfigError::LossBoundLength {
                expected: self.num_constraints,
                found: self.loss_bound.len(),
            });
        }
        if let Some(i) = self.loss_bound.iter().position(|b| !b.is_finite()) {
            return Err(invalid("loss_bound", format!("entry {} is not finite", i)));
        }
        if self.lp.max_iter == 0 || self.qp.max_iter == 0 {
            return Err(invalid("lp.max_iter/qp.max_iter", "must be positive"));
        }
        Ok(())
    }
}
