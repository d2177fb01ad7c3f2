use crate::{layout::LayoutError, linprog::LpError, subproblem::QpError};
use ghost_structs::config::ConfigError;
use std::fmt;
use thiserror::Error;

/// Position in the run at which a failure surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureContext {
    pub iteration: Option<usize>,
    /// Index into the four minibatch evaluations of an iteration. `None`
    /// for the diagnostics evaluation at the end of an iteration.
    pub evaluation: Option<usize>,
    pub constraint: Option<usize>,
}

impl FailureContext {
    pub fn at_iteration(iteration: usize) -> Self {
        Self {
            iteration: Some(iteration),
            ..Default::default()
        }
    }

    pub fn with_evaluation(self, evaluation: usize) -> Self {
        Self {
            evaluation: Some(evaluation),
            ..self
        }
    }

    pub fn with_constraint(self, constraint: usize) -> Self {
        Self {
            constraint: Some(constraint),
            ..self
        }
    }
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.iteration {
            Some(iteration) => write!(f, "iteration {}", iteration)?,
            None => write!(f, "initialization")?,
        }
        match self.evaluation {
            Some(evaluation) => write!(f, ", evaluation {}", evaluation)?,
            None if self.iteration.is_some() => write!(f, ", diagnostics")?,
            None => {}
        }
        if let Some(constraint) = self.constraint {
            write!(f, ", constraint {}", constraint)?;
        }
        Ok(())
    }
}

/// Oracle entry point that was being called when an evaluation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleCall {
    ObjectiveValue,
    ObjectiveGradient,
    ConstraintValue,
    ConstraintGradient,
}

impl fmt::Display for OracleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleCall::ObjectiveValue => write!(f, "objective value"),
            OracleCall::ObjectiveGradient => write!(f, "objective gradient"),
            OracleCall::ConstraintValue => write!(f, "constraint value"),
            OracleCall::ConstraintGradient => write!(f, "constraint gradient"),
        }
    }
}

#[derive(Error, Debug)]
pub enum GhostError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("{call} evaluation failed at {context}: {source}")]
    Evaluation {
        call: OracleCall,
        context: FailureContext,
        source: anyhow::Error,
    },
    /// The kappa linear program failed, by infeasibility or by hitting its
    /// pivot limit.
    #[error("kappa linear program failed at {context}: {source}")]
    LpInfeasible {
        context: FailureContext,
        source: LpError,
    },
    /// No admissible step: either the relaxed constraints cannot be met in
    /// the trust region or the dual iteration stopped short.
    #[error("step subproblem failed at {context}: {source}")]
    QpInfeasible {
        context: FailureContext,
        source: QpError,
    },
    #[error("parameter layout error: {0}")]
    Layout(#[from] LayoutError),
}

pub type Result<T> = std::result::Result<T, GhostError>;

pub(crate) fn evaluation_error(
    call: OracleCall,
    context: FailureContext,
    source: impl Into<anyhow::Error>,
) -> GhostError {
    GhostError::Evaluation {
        call,
        context,
        source: source.into(),
    }
}
