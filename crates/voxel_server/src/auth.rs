//! Name verification for incoming identifications.
//!
//! A client proves ownership of its name with a token issued by the directory
//! service: the lowercase hex MD5 of `secret + username`, where the secret is
//! the value the server published in its presence announcements.

use crate::config::AuthConfig;
use crate::error::AuthError;
use md5::{Digest, Md5};
use std::fmt::Write;
use tracing::debug;
use voxel_protocol::{Identification, PROTOCOL_VERSION};

/// Longest accepted username.
pub const MAX_NAME_LEN: usize = 16;

/// Where a connection is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated,
    Rejected,
}

/// Verifies one connection's identification.
///
/// Only the first identification is evaluated; once accepted or rejected the
/// state is terminal.
#[derive(Debug, Clone)]
pub struct AuthHandshake {
    secret: Option<String>,
    online_mode: bool,
    state: AuthState,
}

impl AuthHandshake {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            online_mode: config.online_mode,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Checks the parts of an identification that need no server state:
    /// the protocol version and the username's shape.
    pub fn check_identification(&mut self, ident: &Identification) -> Result<(), AuthError> {
        self.ensure_pending()?;
        if ident.protocol_version != PROTOCOL_VERSION {
            return self.reject(AuthError::UnsupportedProtocol(ident.protocol_version));
        }
        if !is_valid_username(&ident.name) {
            return self.reject(AuthError::InvalidName(ident.name.clone()));
        }
        Ok(())
    }

    /// Checks the verification token. Succeeds unconditionally when the
    /// server is offline or no secret has been distributed.
    pub fn verify(&mut self, username: &str, token: &str) -> Result<(), AuthError> {
        self.ensure_pending()?;
        let Some(secret) = self.secret.as_deref().filter(|_| self.online_mode) else {
            debug!("Skipping name verification for {}", username);
            return Ok(());
        };
        if token_matches(&verification_token(secret, username), token) {
            Ok(())
        } else {
            self.reject(AuthError::InvalidToken(username.to_string()))
        }
    }

    /// Marks the handshake as accepted once the session is registered.
    pub fn accept(&mut self) {
        if self.state == AuthState::Unauthenticated {
            self.state = AuthState::Authenticated;
        }
    }

    /// Marks the handshake as rejected and hands the error back.
    pub fn reject<T>(&mut self, err: AuthError) -> Result<T, AuthError> {
        self.state = AuthState::Rejected;
        Err(err)
    }

    fn ensure_pending(&self) -> Result<(), AuthError> {
        match self.state {
            AuthState::Unauthenticated => Ok(()),
            _ => Err(AuthError::AlreadyProcessed),
        }
    }
}

/// The token a client must present for `username`.
pub fn verification_token(secret: &str, username: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(secret.as_bytes());
    hasher.update(username.as_bytes());
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(32), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// 1 to 16 characters of `[A-Za-z0-9_.]`.
pub fn is_valid_username(name: &str) -> bool {
    (1..=MAX_NAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

/// Exact comparison against the lowercase digest, in constant time for
/// tokens of the right length.
fn token_matches(expected: &str, presented: &str) -> bool {
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
