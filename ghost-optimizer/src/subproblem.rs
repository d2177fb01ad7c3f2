//! Trust-region step subproblem
//!
//! ```text
//! minimize    1/2 d^T H d + g^T d
//! subject to  A d <= kappa - c
//!             -beta <= d <= beta
//! ```
//!
//! with a diagonal model `H`. Only the rows of `A` are dualized: for fixed
//! multipliers the Lagrangian separates over coordinates and its minimizer
//! over the box is a clamp. Every candidate step therefore lies inside the
//! box exactly. The multipliers come from accelerated projected gradient
//! ascent on the dual (FISTA with adaptive restart); the dual lives in
//! `R^m`, so the cost per iteration is two products with `A`.

use crate::{hessian::HessianApprox, kappa::KappaSolver};
use ghost_structs::config::{LpOptions, QpOptions};
use log::{debug, trace};
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QpError {
    #[error("constraint {constraint} cannot be met inside the trust region (violation {violation:e})")]
    Infeasible { constraint: usize, violation: f64 },
    #[error("no step within tolerance after {iterations} iterations (violation {violation:e})")]
    NotConverged { iterations: usize, violation: f64 },
    #[error("malformed subproblem: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct StepSubproblem<'a> {
    pub fgrad: ArrayView1<'a, f64>,
    pub cval: ArrayView1<'a, f64>,
    pub cgrad: ArrayView2<'a, f64>,
    pub kappa: f64,
    pub beta: f64,
}

struct Dual<'a> {
    g: ArrayView1<'a, f64>,
    a: ArrayView2<'a, f64>,
    rhs: Array1<f64>,
    h: Array1<f64>,
    beta: f64,
}

impl Dual<'_> {
    /// Minimizer of the Lagrangian over the box for multipliers `mu`.
    fn step(&self, mu: &Array1<f64>) -> Array1<f64> {
        let at_mu = self.a.t().dot(mu);
        let beta = self.beta;
        Zip::from(&self.g)
            .and(&at_mu)
            .and(&self.h)
            .map_collect(|&g, &am, &h| (-(g + am) / h).clamp(-beta, beta))
    }

    fn residual(&self, d: &Array1<f64>) -> Array1<f64> {
        self.a.dot(d) - &self.rhs
    }

    fn objective(&self, d: &Array1<f64>) -> f64 {
        Zip::from(d)
            .and(&self.g)
            .and(&self.h)
            .fold(0.0, |acc, &d, &g, &h| acc + 0.5 * h * d * d + g * d)
    }
}

fn max_violation(r: &Array1<f64>) -> (usize, f64) {
    r.iter()
        .enumerate()
        .fold((0, 0.0), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
}

impl StepSubproblem<'_> {
    fn check(&self) -> Result<(), QpError> {
        let n = self.fgrad.len();
        let (m, cols) = self.cgrad.dim();
        if cols != n || self.cval.len() != m {
            return Err(QpError::Malformed(format!(
                "gradient of length {}, {} constraint values, {}x{} Jacobian",
                n,
                self.cval.len(),
                m,
                cols
            )));
        }
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(QpError::Malformed(format!("trust region radius {}", self.beta)));
        }
        if !self.kappa.is_finite()
            || self
                .fgrad
                .iter()
                .chain(self.cval.iter())
                .chain(self.cgrad.iter())
                .any(|v| !v.is_finite())
        {
            return Err(QpError::Malformed("non-finite input".to_string()));
        }
        Ok(())
    }

    pub fn solve(
        &self,
        hessian: &dyn HessianApprox,
        options: &QpOptions,
    ) -> Result<Array1<f64>, QpError> {
        self.check()?;
        let n = self.fgrad.len();
        let m = self.cval.len();
        let h = hessian.diagonal(n);
        if h.len() != n || h.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(QpError::Malformed(format!(
                "{} hessian model is not positive definite",
                hessian.name()
            )));
        }
        let rhs = self.cval.mapv(|c| self.kappa - c);

        // a single row that cannot be met anywhere in the box
        for (i, row) in self.cgrad.outer_iter().enumerate() {
            let lowest = -self.beta * row.iter().map(|a| a.abs()).sum::<f64>();
            if lowest > rhs[i] + options.feas_tol {
                return Err(QpError::Infeasible {
                    constraint: i,
                    violation: lowest - rhs[i],
                });
            }
        }

        let h_min = h.iter().cloned().fold(f64::INFINITY, f64::min);
        let lipschitz = self.cgrad.iter().map(|a| a * a).sum::<f64>() / h_min;
        let dual = Dual {
            g: self.fgrad,
            a: self.cgrad,
            rhs,
            h,
            beta: self.beta,
        };
        if m == 0 || lipschitz == 0.0 {
            return Ok(dual.step(&Array1::zeros(m)));
        }
        let lr = 1.0 / lipschitz;

        let mut mu = Array1::<f64>::zeros(m);
        let mut y = mu.clone();
        let mut t = 1.0f64;
        for iteration in 0..options.max_iter {
            let d_y = dual.step(&y);
            let grad = dual.residual(&d_y);
            let mu_next = Zip::from(&y)
                .and(&grad)
                .map_collect(|&y, &g| (y + lr * g).max(0.0));

            let d = dual.step(&mu_next);
            let r = dual.residual(&d);
            let (_, violation) = max_violation(&r);
            let complementarity: f64 = Zip::from(&mu_next)
                .and(&r)
                .fold(0.0, |acc, &mu, &r| acc + (mu * r).abs());
            if violation <= options.feas_tol
                && complementarity <= options.tol * (1.0 + dual.objective(&d).abs())
            {
                trace!("step subproblem solved in {} iterations", iteration + 1);
                return Ok(d);
            }

            let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
            let momentum = (t - 1.0) / t_next;
            // restart once the momentum points against the projected step
            let restart = Zip::from(&y)
                .and(&mu_next)
                .and(&mu)
                .fold(0.0, |acc, &y, &next, &prev| acc + (y - next) * (next - prev))
                > 0.0;
            if restart {
                y = mu_next.clone();
                t = 1.0;
            } else {
                y = &mu_next + &((&mu_next - &mu) * momentum);
                t = t_next;
            }
            mu = mu_next;
        }

        let d = dual.step(&mu);
        let (constraint, violation) = max_violation(&dual.residual(&d));
        if violation <= options.feas_tol {
            debug!(
                "step subproblem stopped at the iteration limit with a feasible step ({} iterations)",
                options.max_iter
            );
            return Ok(d);
        }

        // decide between an empty feasible set and slow convergence
        let certificate = KappaSolver::new(self.beta, 1.0, LpOptions::default())
            .solve(dual.rhs.mapv(|r| -r).view(), self.cgrad)
            .map_err(|e| QpError::Malformed(e.to_string()))?;
        match certificate.lp_value {
            Some(lowest) if lowest > options.feas_tol => Err(QpError::Infeasible {
                constraint,
                violation: lowest,
            }),
            _ => Err(QpError::NotConverged {
                iterations: options.max_iter,
                violation,
            }),
        }
    }
}
