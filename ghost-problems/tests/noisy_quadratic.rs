use ghost_optimizer::{optimize, StochasticOracle};
use ghost_problems::noisy_quadratic::{Challenge, Difficulty};
use ndarray::{array, ArrayD};

fn instance(seed: u8, difficulty: Vec<i32>) -> Challenge {
    let difficulty = Difficulty::try_from(difficulty).unwrap();
    Challenge::generate_instance(&[seed; 32], &difficulty).unwrap()
}

#[test]
fn test_difficulty_parsing() {
    let d = Difficulty::try_from(vec![4, 10]).unwrap();
    assert_eq!(d.num_params, 4);
    assert_eq!(Vec::<i32>::from(d), vec![4, 10]);
    assert!(Difficulty::try_from(vec![4]).is_err());
    assert!(Difficulty::try_from(vec![0, 10]).is_err());
    assert!(Difficulty::try_from(vec![4, -1]).is_err());
}

#[test]
fn test_generation_is_deterministic() {
    let a = instance(1, vec![5, 10]);
    let b = instance(1, vec![5, 10]);
    let c = instance(2, vec![5, 10]);
    assert_eq!(a.center, b.center);
    assert_eq!(a.offset, b.offset);
    assert_ne!(a.center, c.center);
    let norm: f64 = a.normal.iter().map(|v| v * v).sum();
    assert!((norm - 1.0).abs() < 1e-12);
    // the unconstrained minimizer is infeasible
    assert!(a.constraint(&a.center) >= 0.5);
}

#[test]
fn test_minimizer_is_on_the_boundary() {
    let challenge = instance(3, vec![3, 0]);
    let w = challenge.minimizer();
    assert!(challenge.constraint(&w).abs() < 1e-12);
    let params = vec![ArrayD::from_shape_vec(vec![3], w).unwrap()];
    challenge.verify_solution(&params).unwrap();
    assert!(challenge
        .verify_solution(&[ArrayD::from_shape_vec(vec![3], challenge.center.clone()).unwrap()])
        .is_err());
    assert!(challenge.verify_solution(&[array![0.0].into_dyn()]).is_err());
}

#[test]
fn test_noise_free_oracle() {
    let challenge = instance(4, vec![2, 0]);
    let oracle = challenge.oracle().unwrap();
    let w = vec![array![0.5, -0.5].into_dyn()];
    let grad = oracle.objective_gradient(&w, 1).unwrap();
    assert!((grad[0][[0]] - (0.5 - challenge.center[0])).abs() < 1e-12);
    assert!((grad[0][[1]] - (-0.5 - challenge.center[1])).abs() < 1e-12);
    let value = oracle.constraint_value(0, &w, 1).unwrap();
    assert!((value - challenge.constraint(&[0.5, -0.5])).abs() < 1e-12);
    assert!(oracle.constraint_value(1, &w, 1).is_err());
}

#[test]
fn test_optimizer_solves_instance() {
    let challenge = instance(5, vec![4, 10]);
    let oracle = challenge.oracle().unwrap();
    let outcome = optimize(
        &oracle,
        challenge.initial_params(),
        challenge.default_config(),
        [5; 32],
    )
    .unwrap();
    assert_eq!(outcome.trajectory.len(), 500);
    challenge.verify_solution(&outcome.params).unwrap();
}
