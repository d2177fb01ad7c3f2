/// Derives a 32 byte seed for a run from its settings, a caller supplied
/// random string and a nonce.
pub fn seed_from_parts(settings_json: &str, rand_hash: &str, nonce: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(settings_json.as_bytes());
    hasher.update(rand_hash.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    hasher.finalize().into()
}

/// Independent seed for a named random stream derived from `seed`.
pub fn derive_seed(seed: &[u8; 32], label: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed);
    hasher.update(label.as_bytes());
    hasher.finalize().into()
}
