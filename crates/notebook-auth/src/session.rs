//! Opaque session token minting
//!
//! A session token is the only credential a user's notebook environment
//! ever holds: 256 bits from the OS CSPRNG, rendered as 64 lowercase hex
//! characters. The broker resolves it back to the real OAuth pair.

use rand::RngExt;

/// Rendered length of a session token (32 bytes, hex-encoded).
pub const SESSION_TOKEN_LEN: usize = 64;

/// Mint a fresh session token.
///
/// Stateless; uniqueness rests on the 256-bit random draw. Entropy source
/// failure panics inside `rand` — there is no meaningful recovery from a
/// broken CSPRNG in a credential service.
pub fn mint() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Shape check applied at the broker boundary before any store lookup:
/// exactly 64 characters from `[a-f0-9]`.
pub fn is_valid_token(candidate: &str) -> bool {
    candidate.len() == SESSION_TOKEN_LEN
        && candidate
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
