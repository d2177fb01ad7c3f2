use crate::linprog::{LinearProgram, LpError};
use ghost_structs::config::LpOptions;
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Infeasibility relaxation bound for one linearization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KappaEstimate {
    pub kappa: f64,
    /// Optimal `t` of the trust-region LP, `None` without constraints.
    pub lp_value: Option<f64>,
}

/// Blends the current total violation with the smallest worst-case
/// constraint value reachable inside a box of radius `rho`:
///
/// ```text
/// t*    = min { t : c_i + grad c_i . d <= t for all i, |d|_inf <= rho }
/// kappa = (1 - lambda) * max(0, sum_i max(c_i, 0)) + lambda * max(0, t*)
/// ```
#[derive(Debug, Clone)]
pub struct KappaSolver {
    pub rho: f64,
    pub lambda: f64,
    pub options: LpOptions,
}

impl KappaSolver {
    pub fn new(rho: f64, lambda: f64, options: LpOptions) -> Self {
        Self {
            rho,
            lambda,
            options,
        }
    }

    pub fn solve(
        &self,
        cval: ArrayView1<f64>,
        cgrad: ArrayView2<f64>,
    ) -> Result<KappaEstimate, LpError> {
        let (m, n) = cgrad.dim();
        if cval.len() != m {
            return Err(LpError::Malformed(format!(
                "{} constraint values for a {}x{} Jacobian",
                cval.len(),
                m,
                n
            )));
        }
        if m == 0 {
            return Ok(KappaEstimate {
                kappa: 0.0,
                lp_value: None,
            });
        }

        let violation: f64 = cval.iter().map(|c| c.max(0.0)).sum();
        let lp = self.trust_region_lp(cval, cgrad)?;
        let solution = lp.solve(&self.options)?;
        let kappa =
            (1.0 - self.lambda) * violation.max(0.0) + self.lambda * solution.fun.max(0.0);
        Ok(KappaEstimate {
            kappa,
            lp_value: Some(solution.fun),
        })
    }

    /// Variables are `(t, d)`; rows read `-t + grad c_i . d <= -c_i`.
    fn trust_region_lp(
        &self,
        cval: ArrayView1<f64>,
        cgrad: ArrayView2<f64>,
    ) -> Result<LinearProgram, LpError> {
        let (m, n) = cgrad.dim();
        let mut c = Array1::zeros(n + 1);
        c[0] = 1.0;
        let t_column = Array2::from_elem((m, 1), -1.0);
        let a_ub = concatenate(Axis(1), &[t_column.view(), cgrad.view()])
            .map_err(|e| LpError::Malformed(e.to_string()))?;
        let mut lower = Array1::from_elem(n + 1, -self.rho);
        let mut upper = Array1::from_elem(n + 1, self.rho);
        lower[0] = f64::NEG_INFINITY;
        upper[0] = f64::INFINITY;
        Ok(LinearProgram {
            c,
            a_ub,
            b_ub: cval.mapv(|v| -v),
            lower,
            upper,
        })
    }
}
