//! Password handling.
//!
//! A [`Password`] owns its bytes and wipes them when dropped, so every exit
//! path of the operation holding it (return, `?`, panic unwinding) releases
//! the secret. [`Password::destroy`] makes the release explicit at call
//! sites that want to end the secret's life before the scope does.

use std::fmt;

use subtle::ConstantTimeEq;

use invisilock_common::{Error, Result, SensitiveBytes};

/// Caller-supplied password bytes. Not assumed to be valid UTF-8.
#[derive(Clone)]
pub struct Password(SensitiveBytes);

impl Password {
    /// Take ownership of password bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SensitiveBytes::new(bytes))
    }

    /// Copy password bytes out of a borrowed slice.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    /// Get the password bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Password length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject an empty password.
    pub fn require_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidInput("Password cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Release the password now. The bytes are zeroized before the memory
    /// is returned to the allocator.
    pub fn destroy(self) {
        drop(self);
    }

    /// Compare two passwords without short-circuiting on the first
    /// differing byte.
    pub fn matches(&self, other: &Password) -> bool {
        self.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self(SensitiveBytes::from(value))
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::from_slice(value.as_bytes())
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_debug_redacted() {
        let password = Password::from("correct horse");
        let shown = format!("{:?}", password);
        assert!(!shown.contains("horse"));
    }

    #[test]
    fn test_empty_password_rejected() {
        let err = Password::new(Vec::new()).require_non_empty().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(Password::from("x").require_non_empty().is_ok());
    }

    #[test]
    fn test_password_matches() {
        let a = Password::from("secret");
        assert!(a.matches(&Password::from("secret")));
        assert!(!a.matches(&Password::from("secreT")));
        assert!(!a.matches(&Password::from("secret!")));
        assert!(!a.matches(&Password::new(Vec::new())));
        assert!(Password::new(vec![0xFF, 0x00]).matches(&Password::new(vec![0xFF, 0x00])));
    }

    #[test]
    fn test_non_utf8_password() {
        let password = Password::new(vec![0xFF, 0xFE, 0x00]);
        assert_eq!(password.len(), 3);
        password.destroy();
    }
}
