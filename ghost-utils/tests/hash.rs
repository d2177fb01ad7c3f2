use ghost_utils::*;

#[test]
fn test_seed_from_parts() {
    let a = seed_from_parts(r#"{"problem_id":"noisy_quadratic"}"#, "rand", 1);
    let b = seed_from_parts(r#"{"problem_id":"noisy_quadratic"}"#, "rand", 1);
    let c = seed_from_parts(r#"{"problem_id":"noisy_quadratic"}"#, "rand", 2);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_derive_seed_streams_differ() {
    let seed = [7u8; 32];
    assert_eq!(derive_seed(&seed, "oracle"), derive_seed(&seed, "oracle"));
    assert_ne!(derive_seed(&seed, "oracle"), derive_seed(&seed, "instance"));
    assert_ne!(derive_seed(&seed, "oracle"), seed);
}
