use anyhow::anyhow;
use ghost_optimizer::{
    optimize, stochastic_ghost, DriverState, FailureContext, FnOracle, GhostError, OracleCall,
    StochasticGhost,
};
use ghost_optimizer::{linprog::LpError, subproblem::QpError};
use ghost_structs::config::{
    ConfigError, EvaluationMode, HessianKind, LpOptions, OptimizerConfig, QpOptions, StepDecay,
};
use ndarray::{array, Array1, ArrayD};

fn config(max_iter: usize, num_constraints: usize, num_params: usize) -> OptimizerConfig {
    OptimizerConfig {
        max_iter,
        beta: 1.0,
        rho: 1.0,
        lambda: 0.5,
        hessian: HessianKind::Diag,
        tau: 1.0,
        minibatch_size: 1,
        num_constraints,
        geom_p: 0.5,
        step_decay: StepDecay::Diminishing,
        gamma_zero: 1.0,
        zeta: 0.5,
        dataset_size: 1024,
        num_params,
        loss_bound: vec![0.0; num_constraints],
        evaluation_mode: EvaluationMode::Sequential,
        lp: LpOptions::default(),
        qp: QpOptions::default(),
    }
}

fn scalar(w: &[ArrayD<f64>]) -> f64 {
    w[0][[0]]
}

fn grad(v: f64) -> anyhow::Result<Vec<ArrayD<f64>>> {
    Ok(vec![array![v].into_dyn()])
}

/// (w - 3)^2 subject to w - 2 <= 0
fn bounded_quadratic() -> FnOracle {
    FnOracle::new(
        |w, _| Ok((scalar(w) - 3.0).powi(2)),
        |w, _| grad(2.0 * (scalar(w) - 3.0)),
    )
    .with_constraint(|w, _| Ok(scalar(w) - 2.0), |_, _| grad(1.0))
}

/// Same problem with a gradient bias that vanishes with the batch size, so
/// the four evaluations of an iteration differ.
fn batch_dependent_quadratic() -> FnOracle {
    FnOracle::new(
        |w, _| Ok((scalar(w) - 3.0).powi(2)),
        |w, b| grad(2.0 * (scalar(w) - 3.0) + 1.0 / b as f64),
    )
    .with_constraint(|w, _| Ok(scalar(w) - 2.0), |_, _| grad(1.0))
}

#[test]
fn test_converges_to_constraint_boundary() {
    let oracle = bounded_quadratic();
    let (w, iterfs, itercs) = stochastic_ghost(
        &oracle,
        vec![array![0.0].into_dyn()],
        config(200, 1, 1),
        [0; 32],
    )
    .unwrap();
    assert_eq!(iterfs.len(), 200);
    assert_eq!(itercs.len(), 200);
    assert!((scalar(&w) - 2.0).abs() < 1e-3, "w = {}", scalar(&w));
    assert!(*itercs.last().unwrap() <= 1e-6);
    assert!((iterfs.last().unwrap() - 1.0).abs() < 1e-2);
}

#[test]
fn test_first_iterations() {
    let oracle = bounded_quadratic();
    let mut driver = StochasticGhost::new(
        &oracle,
        vec![array![0.0].into_dyn()],
        config(3, 1, 1),
        [1; 32],
    )
    .unwrap();
    assert_eq!(driver.state(), DriverState::Initializing);

    // full trust-region step, then the step to the linearized boundary
    let first = driver.step().unwrap().unwrap();
    assert_eq!(driver.state(), DriverState::Iterating { iteration: 0 });
    assert_eq!(first.gamma, 1.0);
    assert_eq!(first.kappas, [0.0; 4]);
    assert!((scalar(driver.params()) - 1.0).abs() < 1e-9);
    assert!((first.max_constraint + 1.0).abs() < 1e-9);

    driver.step().unwrap().unwrap();
    assert!((scalar(driver.params()) - (1.0 + 0.5f64.sqrt())).abs() < 1e-7);

    driver.step().unwrap().unwrap();
    assert_eq!(driver.state(), DriverState::Terminated);
    assert!(driver.step().unwrap().is_none());
    assert_eq!(driver.trajectory().len(), 3);
}

#[test]
fn test_parallel_matches_sequential() {
    let oracle = batch_dependent_quadratic();
    let sequential = optimize(
        &oracle,
        vec![array![0.0].into_dyn()],
        config(50, 1, 1),
        [9; 32],
    )
    .unwrap();
    let parallel_config = OptimizerConfig {
        evaluation_mode: EvaluationMode::Parallel,
        ..config(50, 1, 1)
    };
    let parallel = optimize(
        &oracle,
        vec![array![0.0].into_dyn()],
        parallel_config,
        [9; 32],
    )
    .unwrap();
    assert_eq!(sequential.params, parallel.params);
    assert_eq!(sequential.trajectory, parallel.trajectory);
}

#[test]
fn test_seed_reproducibility() {
    let oracle = batch_dependent_quadratic();
    let run = |seed: [u8; 32]| {
        optimize(&oracle, vec![array![0.0].into_dyn()], config(50, 1, 1), seed).unwrap()
    };
    let a = run([5; 32]);
    let b = run([5; 32]);
    let c = run([6; 32]);
    assert_eq!(a.trajectory, b.trajectory);
    assert_eq!(a.params, b.params);
    let levels = |o: &ghost_optimizer::Outcome| {
        o.trajectory.records.iter().map(|r| r.level).collect::<Vec<_>>()
    };
    assert_ne!(levels(&a), levels(&c));
}

#[test]
fn test_multiple_tensors_without_constraints() {
    let target = [0.5, -0.25, 0.75, -1.0, 0.1];
    let oracle = FnOracle::new(
        move |w, _| {
            let flat: Vec<f64> = w.iter().flat_map(|t| t.iter().cloned()).collect();
            Ok(flat
                .iter()
                .zip(target.iter())
                .map(|(a, b)| 0.5 * (a - b).powi(2))
                .sum())
        },
        move |w, _| {
            Ok(vec![
                &w[0] - &array![[target[0], target[1]], [target[2], target[3]]].into_dyn(),
                &w[1] - &array![target[4]].into_dyn(),
            ])
        },
    );
    let initw = vec![
        ArrayD::zeros(ndarray::IxDyn(&[2, 2])),
        ArrayD::zeros(ndarray::IxDyn(&[1])),
    ];
    let outcome = optimize(&oracle, initw, config(100, 0, 5), [2; 32]).unwrap();
    assert_eq!(outcome.params[0].shape(), &[2, 2]);
    assert!(outcome.trajectory.itercs().iter().all(|c| *c == 0.0));
    assert!(outcome.trajectory.records.iter().all(|r| r.kappas == [0.0; 4]));
    assert!(*outcome.trajectory.iterfs().last().unwrap() < 1e-10);
}

#[test]
fn test_loss_bound_shifts_constraint() {
    // w - 1 <= 0.5
    let oracle = FnOracle::new(
        |w, _| Ok((scalar(w) - 3.0).powi(2)),
        |w, _| grad(2.0 * (scalar(w) - 3.0)),
    )
    .with_constraint(|w, _| Ok(scalar(w) - 1.0), |_, _| grad(1.0));
    let config = OptimizerConfig {
        loss_bound: vec![0.5],
        ..config(200, 1, 1)
    };
    let (w, _, itercs) =
        stochastic_ghost(&oracle, vec![array![0.0].into_dyn()], config, [0; 32]).unwrap();
    assert!((scalar(&w) - 1.5).abs() < 1e-3);
    assert!(*itercs.last().unwrap() <= 1e-6);
}

#[test]
fn test_evaluation_failure_carries_context() {
    let oracle = bounded_quadratic().with_constraint(
        |w, _| {
            if scalar(w) > 1.5 {
                Err(anyhow!("sensor offline"))
            } else {
                Ok(scalar(w) - 5.0)
            }
        },
        |_, _| grad(1.0),
    );
    let err = optimize(
        &oracle,
        vec![array![0.0].into_dyn()],
        config(10, 2, 1),
        [0; 32],
    )
    .unwrap_err();
    match err {
        GhostError::Evaluation {
            call,
            context,
            source,
        } => {
            assert_eq!(call, OracleCall::ConstraintValue);
            assert_eq!(
                context,
                FailureContext {
                    iteration: Some(1),
                    evaluation: None,
                    constraint: Some(1),
                }
            );
            assert_eq!(source.to_string(), "sensor offline");
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_unreachable_constraint_fails_step_subproblem() {
    // the kappa box (rho = 10) reaches further than the trust region (beta = 1)
    let oracle = FnOracle::new(
        |w, _| Ok((scalar(w) - 3.0).powi(2)),
        |w, _| grad(2.0 * (scalar(w) - 3.0)),
    )
    .with_constraint(|_, _| Ok(-1.0), |_, _| grad(0.0))
    .with_constraint(|w, _| Ok(scalar(w) + 5.0), |_, _| grad(1.0));
    let config = OptimizerConfig {
        rho: 10.0,
        ..config(5, 2, 1)
    };
    let err = optimize(&oracle, vec![array![0.0].into_dyn()], config, [0; 32]).unwrap_err();
    match err {
        GhostError::QpInfeasible { context, source } => {
            assert_eq!(
                context,
                FailureContext {
                    iteration: Some(0),
                    evaluation: Some(0),
                    constraint: Some(1),
                }
            );
            match source {
                QpError::Infeasible {
                    constraint,
                    violation,
                } => {
                    assert_eq!(constraint, 1);
                    assert!((violation - 1.5).abs() < 1e-9);
                }
                other => panic!("unexpected subproblem error {}", other),
            }
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_slow_subproblem_reports_non_convergence() {
    // the constraint w <= 0.5 cuts the full step, and one dual iteration
    // cannot find the multiplier
    let oracle = FnOracle::new(
        |w, _| Ok((scalar(w) - 3.0).powi(2)),
        |w, _| grad(2.0 * (scalar(w) - 3.0)),
    )
    .with_constraint(|w, _| Ok(scalar(w) - 0.5), |_, _| grad(1.0));
    let config = OptimizerConfig {
        qp: QpOptions {
            max_iter: 1,
            ..QpOptions::default()
        },
        ..config(5, 1, 1)
    };
    let err = optimize(&oracle, vec![array![0.0].into_dyn()], config, [0; 32]).unwrap_err();
    assert!(err.to_string().contains("no step within tolerance"));
    match err {
        GhostError::QpInfeasible { context, source } => {
            assert_eq!(context.iteration, Some(0));
            assert_eq!(context.evaluation, Some(0));
            assert_eq!(context.constraint, None);
            assert!(matches!(source, QpError::NotConverged { iterations: 1, .. }));
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_kappa_pivot_limit_carries_context() {
    // two violated constraints pulling in opposite directions need two
    // phase one pivots
    let oracle = FnOracle::new(|_, _| Ok(0.0), |_, _| grad(0.0))
        .with_constraint(|w, _| Ok(scalar(w) + 5.0), |_, _| grad(1.0))
        .with_constraint(|w, _| Ok(5.0 - scalar(w)), |_, _| grad(-1.0));
    let config = OptimizerConfig {
        lp: LpOptions {
            max_iter: 1,
            ..LpOptions::default()
        },
        ..config(5, 2, 1)
    };
    let err = optimize(&oracle, vec![array![0.0].into_dyn()], config, [0; 32]).unwrap_err();
    match err {
        GhostError::LpInfeasible { context, source } => {
            assert_eq!(
                context,
                FailureContext {
                    iteration: Some(0),
                    evaluation: Some(0),
                    constraint: None,
                }
            );
            assert_eq!(source, LpError::IterationLimit { iterations: 1 });
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_many_parameters() {
    // 1/2 |w - 1|^2  s.t.  sum_j a_j w_j - 1 <= 0 with a_j = +-1/n
    let n = 30_000;
    let a = Array1::from_shape_fn(n, |j| (if j % 2 == 0 { 1.0 } else { -1.0 }) / n as f64);
    let value_a = a.clone();
    let oracle = FnOracle::new(
        |w, _| Ok(w[0].iter().map(|v| 0.5 * (v - 1.0).powi(2)).sum()),
        |w, _| Ok(vec![w[0].mapv(|v| v - 1.0)]),
    )
    .with_constraint(
        move |w, _| Ok(w[0].iter().zip(&value_a).map(|(w, a)| w * a).sum::<f64>() - 1.0),
        move |_, _| Ok(vec![a.clone().into_dyn()]),
    );
    let outcome = optimize(
        &oracle,
        vec![ArrayD::zeros(ndarray::IxDyn(&[n]))],
        config(2, 1, n),
        [0; 32],
    )
    .unwrap();
    assert_eq!(outcome.trajectory.len(), 2);
    assert!(outcome.trajectory.itercs().iter().all(|c| *c < 0.0));
    // a full step reaches the minimizer, which is strictly feasible
    assert!(outcome.params[0].iter().all(|v| (v - 1.0).abs() < 1e-9));
}

#[test]
fn test_gradient_shape_mismatch() {
    let oracle = FnOracle::new(|_, _| Ok(0.0), |_, _| Ok(vec![array![1.0, 2.0].into_dyn()]));
    let err = optimize(&oracle, vec![array![0.0].into_dyn()], config(5, 0, 1), [0; 32])
        .unwrap_err();
    match err {
        GhostError::Evaluation { call, context, .. } => {
            assert_eq!(call, OracleCall::ObjectiveGradient);
            assert_eq!(context.iteration, Some(0));
            assert_eq!(context.evaluation, Some(0));
        }
        other => panic!("unexpected error {}", other),
    }
}

#[test]
fn test_configuration_mismatches() {
    let oracle = bounded_quadratic();
    let initw = || vec![array![0.0].into_dyn()];

    let err = optimize(&oracle, initw(), config(5, 1, 2), [0; 32]).unwrap_err();
    assert!(matches!(
        err,
        GhostError::Configuration(ConfigError::Mismatch {
            expected: 2,
            found: 1,
            ..
        })
    ));

    let err = optimize(&oracle, initw(), config(5, 2, 1), [0; 32]).unwrap_err();
    assert!(matches!(err, GhostError::Configuration(_)));

    let short_bounds = OptimizerConfig {
        loss_bound: vec![],
        ..config(5, 1, 1)
    };
    let err = optimize(&oracle, initw(), short_bounds, [0; 32]).unwrap_err();
    assert!(matches!(
        err,
        GhostError::Configuration(ConfigError::LossBoundLength {
            expected: 1,
            found: 0
        })
    ));

    let bad_radius = OptimizerConfig {
        beta: 0.0,
        ..config(5, 1, 1)
    };
    let err = optimize(&oracle, initw(), bad_radius, [0; 32]).unwrap_err();
    assert!(matches!(
        err,
        GhostError::Configuration(ConfigError::InvalidValue { field: "beta", .. })
    ));
}

#[test]
fn test_zero_iterations_returns_initial_point() {
    let oracle = bounded_quadratic();
    let (w, iterfs, itercs) = stochastic_ghost(
        &oracle,
        vec![array![0.25].into_dyn()],
        config(0, 1, 1),
        [0; 32],
    )
    .unwrap();
    assert_eq!(scalar(&w), 0.25);
    assert!(iterfs.is_empty() && itercs.is_empty());
}
