//! Dense bounded-variable primal simplex for small linear programs
//!
//! ```text
//! minimize    c^T x
//! subject to  A x <= b
//!             lower <= x <= upper
//! ```
//!
//! Bounds may be infinite. Variable bounds are handled implicitly (a
//! nonbasic variable sits at one of its bounds, or at zero when free), so
//! the tableau has one row per inequality regardless of how many variables
//! are boxed. Rows that are violated by the starting point get an
//! artificial variable and are repaired in a first phase.
//!
//! Pivoting follows Bland's rule, which rules out cycling on degenerate
//! vertices.

use ghost_structs::config::LpOptions;
use log::trace;
use ndarray::{Array1, Array2};
use thiserror::Error;

const PIVOT_TOL: f64 = 1e-11;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LpError {
    #[error("problem is infeasible (phase one residual {residual:e})")]
    Infeasible { residual: f64 },
    #[error("objective is unbounded below")]
    Unbounded,
    #[error("no optimal vertex after {iterations} iterations")]
    IterationLimit { iterations: usize },
    #[error("malformed problem: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct LinearProgram {
    pub c: Array1<f64>,
    pub a_ub: Array2<f64>,
    pub b_ub: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct LpSolution {
    pub x: Array1<f64>,
    pub fun: f64,
    pub iterations: usize,
}

impl LinearProgram {
    fn check(&self) -> Result<(), LpError> {
        let n = self.c.len();
        let (m, cols) = self.a_ub.dim();
        if cols != n {
            return Err(LpError::Malformed(format!(
                "A has {} columns for {} variables",
                cols, n
            )));
        }
        if self.b_ub.len() != m {
            return Err(LpError::Malformed(format!(
                "b has {} entries for {} rows",
                self.b_ub.len(),
                m
            )));
        }
        if self.lower.len() != n || self.upper.len() != n {
            return Err(LpError::Malformed("bound vectors do not match c".to_string()));
        }
        if self
            .c
            .iter()
            .chain(self.a_ub.iter())
            .chain(self.b_ub.iter())
            .any(|v| !v.is_finite())
        {
            return Err(LpError::Malformed("non-finite coefficient".to_string()));
        }
        if self.lower.iter().chain(self.upper.iter()).any(|v| v.is_nan()) {
            return Err(LpError::Malformed("NaN bound".to_string()));
        }
        for (l, u) in self.lower.iter().zip(self.upper.iter()) {
            if l > u {
                return Err(LpError::Infeasible { residual: l - u });
            }
        }
        Ok(())
    }

    pub fn solve(&self, options: &LpOptions) -> Result<LpSolution, LpError> {
        self.check()?;
        let mut tableau = Tableau::new(self);
        let mut iterations = 0;

        if tableau.num_artificial > 0 {
            let phase_one_cost: Vec<f64> = (0..tableau.ncols)
                .map(|j| if tableau.is_artificial(j) { 1.0 } else { 0.0 })
                .collect();
            iterations += tableau.optimize(&phase_one_cost, options, iterations)?;
            let residual: f64 = (tableau.first_artificial..tableau.ncols)
                .map(|j| tableau.x[j])
                .sum();
            let scale = 1.0 + self.b_ub.iter().fold(0.0f64, |acc, b| acc.max(b.abs()));
            if residual > options.tol * scale {
                return Err(LpError::Infeasible { residual });
            }
            // artificials are pinned at zero from here on
            for j in tableau.first_artificial..tableau.ncols {
                tableau.upper[j] = 0.0;
            }
            trace!("phase one done after {} iterations", iterations);
        }

        let mut phase_two_cost = vec![0.0; tableau.ncols];
        for (j, c) in self.c.iter().enumerate() {
            phase_two_cost[j] = *c;
        }
        iterations += tableau.optimize(&phase_two_cost, options, iterations)?;

        let x = Array1::from_iter(tableau.x[..self.c.len()].iter().cloned());
        let fun = self.c.dot(&x);
        trace!("optimal value {:e} after {} iterations", fun, iterations);
        Ok(LpSolution {
            x,
            fun,
            iterations,
        })
    }
}

struct Tableau {
    /// `B^-1 [A I E]` where `E` holds the artificial columns.
    rows: Array2<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    x: Vec<f64>,
    basis: Vec<usize>,
    is_basic: Vec<bool>,
    ncols: usize,
    first_artificial: usize,
    num_artificial: usize,
}

impl Tableau {
    fn new(lp: &LinearProgram) -> Self {
        let n = lp.c.len();
        let m = lp.b_ub.len();

        let start: Vec<f64> = lp
            .lower
            .iter()
            .zip(lp.upper.iter())
            .map(|(&l, &u)| {
                if l.is_finite() {
                    l
                } else if u.is_finite() {
                    u
                } else {
                    0.0
                }
            })
            .collect();
        let residuals: Vec<f64> = (0..m)
            .map(|i| {
                lp.b_ub[i]
                    - lp.a_ub
                        .row(i)
                        .iter()
                        .zip(&start)
                        .map(|(a, x)| a * x)
                        .sum::<f64>()
            })
            .collect();
        let num_artificial = residuals.iter().filter(|r| **r < 0.0).count();
        let first_artificial = n + m;
        let ncols = n + m + num_artificial;

        let mut rows = Array2::zeros((m, ncols));
        let mut lower = Vec::with_capacity(ncols);
        let mut upper = Vec::with_capacity(ncols);
        let mut x = vec![0.0; ncols];
        lower.extend(lp.lower.iter().cloned());
        upper.extend(lp.upper.iter().cloned());
        x[..n].copy_from_slice(&start);
        lower.extend(std::iter::repeat(0.0).take(m + num_artificial));
        upper.extend(std::iter::repeat(f64::INFINITY).take(m + num_artificial));

        let mut basis = Vec::with_capacity(m);
        let mut next_artificial = first_artificial;
        for (i, &residual) in residuals.iter().enumerate() {
            rows.row_mut(i)
                .slice_mut(ndarray::s![..n])
                .assign(&lp.a_ub.row(i));
            rows[[i, n + i]] = 1.0;
            if residual >= 0.0 {
                basis.push(n + i);
                x[n + i] = residual;
            } else {
                // a_i x + s_i - e_i = b_i, with e_i basic; negate so the basic
                // column reads +1
                rows[[i, next_artificial]] = -1.0;
                rows.row_mut(i).mapv_inplace(|v| -v);
                basis.push(next_artificial);
                x[next_artificial] = -residual;
                next_artificial += 1;
            }
        }
        let mut is_basic = vec![false; ncols];
        for &b in &basis {
            is_basic[b] = true;
        }

        Self {
            rows,
            lower,
            upper,
            x,
            basis,
            is_basic,
            ncols,
            first_artificial,
            num_artificial,
        }
    }

    fn is_artificial(&self, j: usize) -> bool {
        j >= self.first_artificial
    }

    /// Reduced costs `cost - B^-T c_B . column` of every column.
    fn reduced_costs(&self, cost: &[f64]) -> Array1<f64> {
        let basic_cost = Array1::from_iter(self.basis.iter().map(|&b| cost[b]));
        Array1::from_vec(cost.to_vec()) - self.rows.t().dot(&basic_cost)
    }

    /// Smallest-index improving column at or after `from`, with the
    /// direction in which it moves.
    fn entering(&self, reduced: &Array1<f64>, from: usize, tol: f64) -> Option<(usize, f64)> {
        (from..self.ncols).find_map(|j| {
            if self.is_basic[j] || self.upper[j] <= self.lower[j] {
                None
            } else if reduced[j] < -tol && self.x[j] < self.upper[j] {
                Some((j, 1.0))
            } else if reduced[j] > tol && self.x[j] > self.lower[j] {
                Some((j, -1.0))
            } else {
                None
            }
        })
    }

    /// Runs simplex iterations for `cost` from the current basis. Returns the
    /// number of pivots used.
    ///
    /// Only basis changes count against `max_iter`. A bound flip leaves the
    /// basis and the reduced costs untouched, so the scan for the next
    /// entering column resumes after the flipped one; every column flips
    /// at most once per basis.
    fn optimize(
        &mut self,
        cost: &[f64],
        options: &LpOptions,
        spent: usize,
    ) -> Result<usize, LpError> {
        let m = self.basis.len();
        let mut pivots = 0;
        let mut flips = 0;
        let mut reduced = self.reduced_costs(cost);
        let mut from = 0;
        loop {
            let Some((j, direction)) = self.entering(&reduced, from, options.tol) else {
                if flips > 0 {
                    trace!("{} pivots and {} bound flips", pivots, flips);
                }
                return Ok(pivots);
            };

            // ratio test; a bound flip of the entering variable competes with
            // every basic variable reaching one of its bounds
            let mut theta = self.upper[j] - self.lower[j];
            let mut leaving: Option<(usize, bool)> = None;
            for i in 0..m {
                let alpha = direction * self.rows[[i, j]];
                if alpha.abs() <= PIVOT_TOL {
                    continue;
                }
                let b = self.basis[i];
                let (limit, to_upper) = if alpha > 0.0 {
                    if !self.lower[b].is_finite() {
                        continue;
                    }
                    ((self.x[b] - self.lower[b]).max(0.0) / alpha, false)
                } else {
                    if !self.upper[b].is_finite() {
                        continue;
                    }
                    ((self.upper[b] - self.x[b]).max(0.0) / -alpha, true)
                };
                let better = match leaving {
                    _ if limit < theta - PIVOT_TOL => true,
                    Some((r, _)) if limit <= theta + PIVOT_TOL => b < self.basis[r],
                    None if limit <= theta => true,
                    _ => false,
                };
                if better {
                    theta = limit;
                    leaving = Some((i, to_upper));
                }
            }
            if !theta.is_finite() {
                return Err(LpError::Unbounded);
            }
            if leaving.is_some() && spent + pivots >= options.max_iter {
                return Err(LpError::IterationLimit {
                    iterations: spent + pivots,
                });
            }

            self.x[j] += direction * theta;
            for i in 0..m {
                let b = self.basis[i];
                self.x[b] -= direction * theta * self.rows[[i, j]];
            }

            match leaving {
                Some((r, to_upper)) => {
                    let b = self.basis[r];
                    self.x[b] = if to_upper { self.upper[b] } else { self.lower[b] };
                    self.pivot(r, j);
                    self.is_basic[b] = false;
                    self.is_basic[j] = true;
                    self.basis[r] = j;
                    pivots += 1;
                    reduced = self.reduced_costs(cost);
                    from = 0;
                }
                None => {
                    self.x[j] = if direction > 0.0 {
                        self.upper[j]
                    } else {
                        self.lower[j]
                    };
                    flips += 1;
                    from = j + 1;
                }
            }
        }
    }

    fn pivot(&mut self, r: usize, j: usize) {
        let p = self.rows[[r, j]];
        let pivot_row = self.rows.row(r).mapv(|v| v / p);
        self.rows.row_mut(r).assign(&pivot_row);
        for i in 0..self.rows.nrows() {
            if i == r {
                continue;
            }
            let f = self.rows[[i, j]];
            if f != 0.0 {
                self.rows.row_mut(i).scaled_add(-f, &pivot_row);
            }
        }
    }
}
