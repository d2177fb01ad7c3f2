use ghost_structs::config::StepDecay;
use log::warn;

/// Stepsize for iteration `t` under one of the decay policies.
///
/// `SlowDiminishing` is a recurrence on the previous stepsize, so the
/// schedule is stateful and must be queried once per iteration, in order.
#[derive(Debug, Clone)]
pub struct StepSchedule {
    decay: StepDecay,
    gamma_zero: f64,
    zeta: f64,
    last: Option<f64>,
}

impl StepSchedule {
    pub fn new(decay: StepDecay, gamma_zero: f64, zeta: f64) -> Self {
        Self {
            decay,
            gamma_zero,
            zeta,
            last: None,
        }
    }

    pub fn gamma(&mut self, t: usize) -> f64 {
        let gamma = match self.decay {
            StepDecay::Diminishing => self.gamma_zero / ((t + 1) as f64).powf(self.zeta),
            StepDecay::Constant => self.gamma_zero,
            StepDecay::SlowDiminishing => match self.last {
                Some(prev) if t > 0 => prev * (1.0 - self.zeta * prev),
                _ => self.gamma_zero,
            },
            StepDecay::Stepwise => {
                let exponent = (t as f64 * self.zeta).floor();
                self.gamma_zero / 10f64.powi(exponent as i32)
            }
        };
        if gamma <= 0.0 && self.last.map_or(true, |prev| prev > 0.0) {
            warn!(
                "{} stepsize reached {:e} at iteration {}; further steps move against the search direction",
                self.decay, gamma, t
            );
        }
        self.last = Some(gamma);
        gamma
    }
}
