//! Apache `$apr1$` MD5-crypt.
//!
//! The format is `$apr1$<salt>$<digest>` where the salt has at most eight
//! characters and the digest is 22 characters of the crypt base-64 alphabet.

use md5::{Digest, Md5};

use super::HashError;

pub const APR1_PREFIX: &str = "$apr1$";

const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const MAX_SALT_LEN: usize = 8;
const ROUNDS: usize = 1000;

/// Verifies `password` against a `$apr1$` hash string.
pub fn verify(password: &str, hash: &str) -> Result<bool, HashError> {
    let salt = parse_salt(hash)?;
    let computed = crypt(password.as_bytes(), salt.as_bytes());
    Ok(constant_time_eq(computed.as_bytes(), hash.as_bytes()))
}

fn parse_salt(hash: &str) -> Result<&str, HashError> {
    let rest = hash
        .strip_prefix(APR1_PREFIX)
        .ok_or_else(|| HashError::Malformed("missing $apr1$ prefix".to_string()))?;
    let (salt, digest) = rest
        .split_once('$')
        .ok_or_else(|| HashError::Malformed("missing digest separator".to_string()))?;

    if salt.is_empty() || salt.len() > MAX_SALT_LEN {
        return Err(HashError::Malformed(format!(
            "salt must have 1 to {MAX_SALT_LEN} characters, got {}",
            salt.len()
        )));
    }
    if digest.len() != 22 || !digest.bytes().all(|b| ITOA64.contains(&b)) {
        return Err(HashError::Malformed("digest is not 22 crypt characters".to_string()));
    }

    Ok(salt)
}

/// Computes the full `$apr1$salt$digest` string for a password and salt.
pub fn crypt(password: &[u8], salt: &[u8]) -> String {
    let salt = &salt[..salt.len().min(MAX_SALT_LEN)];

    let mut alternate = Md5::new();
    alternate.update(password);
    alternate.update(salt);
    alternate.update(password);
    let alternate = alternate.finalize();

    let mut ctx = Md5::new();
    ctx.update(password);
    ctx.update(APR1_PREFIX.as_bytes());
    ctx.update(salt);

    let mut remaining = password.len();
    while remaining > 0 {
        let take = remaining.min(16);
        ctx.update(&alternate[..take]);
        remaining -= take;
    }

    let mut bits = password.len();
    while bits != 0 {
        if bits & 1 == 1 {
            ctx.update([0u8]);
        } else {
            ctx.update(&password[..1]);
        }
        bits >>= 1;
    }

    let mut digest = ctx.finalize();
    for round in 0..ROUNDS {
        let mut ctx = Md5::new();
        if round & 1 == 1 {
            ctx.update(password);
        } else {
            ctx.update(digest);
        }
        if round % 3 != 0 {
            ctx.update(salt);
        }
        if round % 7 != 0 {
            ctx.update(password);
        }
        if round & 1 == 1 {
            ctx.update(digest);
        } else {
            ctx.update(password);
        }
        digest = ctx.finalize();
    }

    let mut out = String::with_capacity(APR1_PREFIX.len() + salt.len() + 23);
    out.push_str(APR1_PREFIX);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');

    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let group =
            (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        push_base64(&mut out, group, 4);
    }
    push_base64(&mut out, u32::from(digest[11]), 2);

    out
}

fn push_base64(out: &mut String, mut value: u32, chars: usize) {
    for _ in 0..chars {
        out.push(ITOA64[(value & 0x3f) as usize] as char);
        value >>= 6;
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
