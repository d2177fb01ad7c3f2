use ghost_structs::config::HessianKind;
use ndarray::Array1;
use std::fmt;

/// Positive definite curvature model for the step subproblem.
///
/// The subproblem solver separates over coordinates, so models are exposed
/// through their diagonal. Richer models (limited-memory quasi-Newton,
/// Fisher information, per-coordinate adaptive scalings) plug in here.
pub trait HessianApprox: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn diagonal(&self, n: usize) -> Array1<f64>;
}

/// `tau * I`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Identity {
    pub tau: f64,
}

impl HessianApprox for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn diagonal(&self, n: usize) -> Array1<f64> {
        Array1::from_elem(n, self.tau)
    }
}

pub fn from_kind(kind: HessianKind, tau: f64) -> Box<dyn HessianApprox> {
    match kind {
        HessianKind::Diag => Box::new(Identity { tau }),
    }
}
