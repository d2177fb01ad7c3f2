use crate::{config::OptimizerConfig, serializable_struct_with_getters};
use ghost_utils::{jsonify, seed_from_parts};
use serde::{Deserialize, Serialize};

serializable_struct_with_getters! {
    RunSettings {
        problem_id: String,
        difficulty: Vec<i32>,
        /// Overrides the problem's default optimizer configuration.
        config: Option<OptimizerConfig>,
    }
}

impl RunSettings {
    pub fn calc_seed(&self, rand_hash: &str, nonce: u64) -> anyhow::Result<[u8; 32]> {
        Ok(seed_from_parts(&jsonify(self)?, rand_hash, nonce))
    }
}

serializable_struct_with_getters! {
    Tensor {
        shape: Vec<usize>,
        data: Vec<f64>,
    }
}

serializable_struct_with_getters! {
    IterationRecord {
        iteration: usize,
        gamma: f64,
        level: u32,
        kappas: [f64; 4],
        step_norm: f64,
        objective: f64,
        max_constraint: f64,
    }
}

serializable_struct_with_getters! {
    Trajectory {
        objective: Vec<f64>,
        constraint: Vec<f64>,
        records: Vec<IterationRecord>,
    }
}

impl Trajectory {
    pub fn with_capacity(max_iter: usize) -> Self {
        Self {
            objective: Vec::with_capacity(max_iter),
            constraint: Vec::with_capacity(max_iter),
            records: Vec::with_capacity(max_iter),
        }
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.objective.push(record.objective);
        self.constraint.push(record.max_constraint);
        self.records.push(record);
    }

    /// Objective value per iteration.
    pub fn iterfs(&self) -> &[f64] {
        &self.objective
    }

    /// Largest constraint value (`c_i(w) - loss_bound_i`) per iteration.
    pub fn itercs(&self) -> &[f64] {
        &self.constraint
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

serializable_struct_with_getters! {
    OutputData {
        nonce: u64,
        settings: RunSettings,
        params: Vec<Tensor>,
        trajectory: Trajectory,
    }
}
