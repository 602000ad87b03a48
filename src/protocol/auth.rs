//! Challenge-response authentication.
//!
//! The digest is MD5 because the protocol mandates it; it must match devices
//! bit for bit and provides no security property.

use md5::{Digest, Md5};

use crate::error::Error;

/// What the device asked for in its greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    /// `PJLINK 0`
    None,
    /// `PJLINK 1 {seed}`
    Required { seed: String },
}

impl AuthChallenge {
    pub fn requires_auth(&self) -> bool {
        matches!(self, AuthChallenge::Required { .. })
    }
}

/// Lowercase hex `MD5(seed ++ password)`, sent before the first request.
pub fn compute_auth_prefix(seed: &str, password: &str) -> Result<String, Error> {
    if password.is_empty() {
        return Err(Error::AuthenticationRequired);
    }
    let mut hasher = Md5::new();
    hasher.update(seed.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
