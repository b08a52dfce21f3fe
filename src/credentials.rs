//! Login credentials for a single execution.
//!
//! The secret never appears in logs, `Debug` output, or API responses; it is
//! only exposed at the moment it is typed into the password field.

use std::fmt;

use secrecy::SecretString;

/// Immutable credential pair for one login execution.
#[derive(Clone)]
pub struct Credentials {
    /// Account identifier (email address).
    pub email: String,

    /// Account secret. Redacted everywhere except the password-entry step.
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
