use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

/// TOTP time step in seconds (RFC 6238 default).
pub const TIME_STEP: u64 = 30;

/// Number of digits in a code.
const DIGITS: u32 = 6;

/// RFC 4226 HOTP over HMAC-SHA1, truncated to six digits.
fn hotp(key: &[u8], counter: u64) -> u32 {
    let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
        .expect("HMAC-SHA1 accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    binary % 10u32.pow(DIGITS)
}

/// Compute the code for one counter value from a base32 seed.
///
/// Returns `None` when the seed is not valid base32.
#[must_use]
pub fn code_at(seed_base32: &str, counter: u64) -> Option<String> {
    let key = base32::decode(
        base32::Alphabet::Rfc4648 { padding: false },
        seed_base32.trim(),
    )?;
    Some(format!("{:06}", hotp(&key, counter)))
}

/// Verify a candidate code at `now_unix` with a ±`window` step tolerance.
///
/// Comparison is constant-time. A malformed seed or candidate never
/// verifies.
#[must_use]
pub fn verify(seed_base32: &str, candidate: &str, now_unix: u64, window: u64) -> bool {
    let candidate = candidate.trim();
    if candidate.len() != DIGITS as usize || !candidate.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let counter = now_unix / TIME_STEP;
    let start = counter.saturating_sub(window);
    for step in start..=counter + window {
        if let Some(expected) = code_at(seed_base32, step)
            && expected.as_bytes().ct_eq(candidate.as_bytes()).unwrap_u8() == 1
        {
            return true;
        }
    }
    false
}

/// Build the `otpauth://` provisioning URI the dashboard renders as a QR.
#[must_use]
pub fn provisioning_uri(seed_base32: &str, issuer: &str, account: &str) -> String {
    format!(
        "otpauth://totp/{issuer}:{account}?secret={seed_base32}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={TIME_STEP}"
    )
}
