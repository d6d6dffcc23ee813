/// `min(60000, 2000 * 2^(attempts-1))` from §4.4 — the uniform attempts-based
/// backoff the Worker Pool applies to every retryable failure, regardless of
/// error code.
pub fn pool_backoff_ms(attempts: i32) -> i64 {
    let exp = attempts.saturating_sub(1).max(0) as u32;
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);
    (2_000_i64.saturating_mul(pow2)).min(60_000)
}
