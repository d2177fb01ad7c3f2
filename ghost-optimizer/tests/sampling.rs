use ghost_optimizer::sampling::LevelSampler;
use rand::{rngs::StdRng, SeedableRng};
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[test]
fn test_max_level() {
    for (n, expected) in [(2, 0), (3, 0), (4, 1), (7, 1), (8, 2), (1000, 8), (1024, 9)] {
        assert_eq!(LevelSampler::new(0.5, n).unwrap().max_level(), expected);
    }
}

#[test]
fn test_invalid_parameters() {
    assert!(LevelSampler::new(0.0, 8).is_err());
    assert!(LevelSampler::new(1.0, 8).is_err());
    assert!(LevelSampler::new(0.5, 1).is_err());
}

#[test]
fn test_smallest_dataset_always_draws_level_zero() {
    let sampler = LevelSampler::new(0.25, 2).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..100 {
        let draw = sampler.sample(&mut rng);
        assert_eq!(draw.level, 0);
        assert_eq!(draw.batch_sizes, [1, 1, 1, 2]);
        assert!((draw.weight - 4.0).abs() < 1e-12);
    }
}

#[test]
fn test_rejection_matches_truncated_law() {
    let p = 0.3;
    let sampler = LevelSampler::new(p, 8).unwrap();
    assert_eq!(sampler.max_level(), 2);
    let total: f64 = (0..=2).map(|s| sampler.probability(s)).sum();
    assert!((total - 1.0).abs() < 1e-12);
    assert_eq!(sampler.probability(3), 0.0);

    let mut rng = StdRng::seed_from_u64(42);
    let draws = 20_000;
    let mut counts = [0usize; 3];
    for _ in 0..draws {
        let draw = sampler.sample(&mut rng);
        assert!(2usize.pow(draw.level + 1) <= 8);
        let half = 1usize << draw.level;
        assert_eq!(draw.batch_sizes, [1, half, half, 2 * half]);
        let weight = 1.0 / (p * (1.0 - p).powi(draw.level as i32));
        assert!((draw.weight - weight).abs() < 1e-12);
        counts[draw.level as usize] += 1;
    }

    let statistic: f64 = counts
        .iter()
        .enumerate()
        .map(|(s, &observed)| {
            let expected = draws as f64 * sampler.probability(s as u32);
            (observed as f64 - expected).powi(2) / expected
        })
        .sum();
    let threshold = ChiSquared::new(2.0).unwrap().inverse_cdf(0.999);
    assert!(
        statistic < threshold,
        "chi-square {} over {}",
        statistic,
        threshold
    );
}
