use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Name of the only supported authentication mechanism.
pub const CHAP_SHA1: &str = "chap-sha1";

/// Number of salt bytes that enter the scramble.
pub const SCRAMBLE_SALT_SIZE: usize = 20;

/// Compute the `chap-sha1` scramble of `password` for the given salt.
///
/// `sha1(password) XOR sha1(salt[..20] ++ sha1(sha1(password)))`
pub fn scramble(password: &str, salt: &[u8]) -> Result<Vec<u8>> {
    if salt.len() < SCRAMBLE_SALT_SIZE {
        return Err(Error::InvalidGreeting(format!(
            "salt has {} bytes, need at least {SCRAMBLE_SALT_SIZE}",
            salt.len()
        )));
    }

    let step1 = Sha1::digest(password.as_bytes());
    let step2 = Sha1::digest(step1);

    let mut hasher = Sha1::new();
    hasher.update(&salt[..SCRAMBLE_SALT_SIZE]);
    hasher.update(step2);
    let step3 = hasher.finalize();

    Ok(step1.iter().zip(step3.iter()).map(|(a, b)| a ^ b).collect())
}
