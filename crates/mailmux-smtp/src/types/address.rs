//! Envelope addresses.

use crate::error::{Error, Result};

/// Email address for the SMTP envelope (`MAIL FROM` / `RCPT TO`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] unless the input has exactly one `@`
    /// with non-empty parts on both sides and nothing that would break the
    /// `<...>` envelope syntax.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        if let Err(reason) = validate(&addr) {
            return Err(Error::InvalidAddress {
                address: addr,
                reason,
            });
        }
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(addr: &str) -> std::result::Result<(), &'static str> {
    if addr.is_empty() {
        return Err("address cannot be empty");
    }
    if addr
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
    {
        return Err("address contains forbidden characters");
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return Err("address must contain @");
    };
    if domain.contains('@') {
        return Err("address must have exactly one @");
    }
    if local.is_empty() || domain.is_empty() {
        return Err("local and domain parts cannot be empty");
    }
    Ok(())
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
