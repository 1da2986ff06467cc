use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};

/// Size of the greeting the server sends right after accepting a connection.
pub const GREETING_SIZE: usize = 128;

/// Length of the salt as sent, base64 encoded.
pub const SALT_ENCODED_LEN: usize = 44;

/// Length of the decoded salt.
pub const SALT_SIZE: usize = 32;

const LINE_SIZE: usize = GREETING_SIZE / 2;

/// Server greeting: a version banner and the per-connection salt used as the
/// authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    server: String,
    salt: Vec<u8>,
}

impl Greeting {
    pub fn new(server: impl Into<String>, salt: [u8; SALT_SIZE]) -> Self {
        Self {
            server: server.into(),
            salt: salt.to_vec(),
        }
    }

    /// Parse the raw 128-byte greeting
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != GREETING_SIZE {
            return Err(Error::InvalidGreeting(format!(
                "expected {GREETING_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let (banner, challenge) = bytes.split_at(LINE_SIZE);
        let server = std::str::from_utf8(banner)
            .map_err(|_| Error::InvalidGreeting("banner is not valid UTF-8".to_string()))?
            .trim_end()
            .to_string();
        if server.is_empty() {
            return Err(Error::InvalidGreeting("empty banner".to_string()));
        }

        let salt = STANDARD
            .decode(&challenge[..SALT_ENCODED_LEN])
            .map_err(|e| Error::InvalidGreeting(format!("salt: {e}")))?;

        Ok(Self { server, salt })
    }

    /// Server banner, e.g. `Tarantool 2.11.1 (Binary) <uuid>`
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Render the greeting the way a server writes it.
    pub fn to_bytes(&self) -> [u8; GREETING_SIZE] {
        let mut out = [b' '; GREETING_SIZE];

        let banner = self.server.as_bytes();
        let banner_len = banner.len().min(LINE_SIZE - 1);
        out[..banner_len].copy_from_slice(&banner[..banner_len]);
        out[LINE_SIZE - 1] = b'\n';

        let salt = STANDARD.encode(&self.salt);
        let salt_len = salt.len().min(LINE_SIZE - 1);
        out[LINE_SIZE..LINE_SIZE + salt_len].copy_from_slice(&salt.as_bytes()[..salt_len]);
        out[GREETING_SIZE - 1] = b'\n';

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salt() -> [u8; SALT_SIZE] {
        std::array::from_fn(|i| i as u8)
    }

    #[test]
    fn parses_rendered_greeting() {
        let greeting = Greeting::new("Tarantool 2.11.1 (Binary) 7e5c1a2b", salt());
        let bytes = greeting.to_bytes();

        assert_eq!(bytes[63], b'\n');
        assert_eq!(
            &bytes[64..64 + SALT_ENCODED_LEN],
            b"AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="
        );

        let parsed = Greeting::parse(&bytes).unwrap();
        assert_eq!(parsed, greeting);
        assert_eq!(parsed.salt().len(), SALT_SIZE);
    }

    #[test]
    fn rejects_short_greeting() {
        assert!(matches!(
            Greeting::parse(b"Tarantool"),
            Err(Error::InvalidGreeting(_))
        ));
    }

    #[test]
    fn rejects_garbled_salt() {
        let mut bytes = Greeting::new("Tarantool", salt()).to_bytes();
        bytes[64] = b'!';
        assert!(matches!(
            Greeting::parse(&bytes),
            Err(Error::InvalidGreeting(_))
        ));
    }
}
