use ghost_optimizer::stepsize::StepSchedule;
use ghost_structs::config::StepDecay;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * b.abs().max(1.0)
}

#[test]
fn test_diminishing() {
    let mut schedule = StepSchedule::new(StepDecay::Diminishing, 1.0, 0.5);
    assert!(close(schedule.gamma(0), 1.0));
    assert!(close(schedule.gamma(1), 1.0 / 2f64.sqrt()));
    assert!(close(schedule.gamma(3), 0.5));
    assert!(close(schedule.gamma(99), 0.1));
}

#[test]
fn test_harmonic_diminishing() {
    let mut schedule = StepSchedule::new(StepDecay::Diminishing, 1.0, 1.0);
    for t in 0..10 {
        assert!(close(schedule.gamma(t), 1.0 / (t + 1) as f64));
    }
}

#[test]
fn test_constant() {
    let mut schedule = StepSchedule::new(StepDecay::Constant, 0.3, 0.9);
    for t in 0..10 {
        assert_eq!(schedule.gamma(t), 0.3);
    }
}

#[test]
fn test_stepwise() {
    let mut schedule = StepSchedule::new(StepDecay::Stepwise, 1.0, 0.25);
    let expected = [1.0, 1.0, 1.0, 1.0, 0.1, 0.1, 0.1, 0.1, 0.01];
    for (t, gamma) in expected.iter().enumerate() {
        assert!(close(schedule.gamma(t), *gamma));
    }
}

#[test]
fn test_stepwise_every_second_iteration() {
    let mut schedule = StepSchedule::new(StepDecay::Stepwise, 1.0, 0.5);
    for t in 0..10 {
        assert!(close(schedule.gamma(t), 10f64.powi(-((t / 2) as i32))));
    }
}

#[test]
fn test_slow_diminishing_recurrence() {
    let mut schedule = StepSchedule::new(StepDecay::SlowDiminishing, 0.5, 1.0);
    assert!(close(schedule.gamma(0), 0.5));
    assert!(close(schedule.gamma(1), 0.25));
    assert!(close(schedule.gamma(2), 0.1875));
    assert!(close(schedule.gamma(3), 0.1875 * (1.0 - 0.1875)));
}
