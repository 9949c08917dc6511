//! Referral code derivation.

/// Length of a derived referral code in hex characters.
pub const REFERRAL_CODE_LEN: usize = 10;

/// Deterministic referral code for a user: the leading hex digits of a
/// Blake3 hash over a namespaced user id, upper-cased.
pub fn referral_code_for(user_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"trellis:referral:");
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode_upper(&digest.as_bytes()[..REFERRAL_CODE_LEN / 2])
}
