//! Client identifiers.

use std::fmt;

/// The kind of value used to attribute a request to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// Host portion of the remote address
    Ip,
    /// Value of the `API_KEY` request header
    Token,
}

impl IdentifierKind {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Ip => "IP",
            IdentifierKind::Token => "TOKEN",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-empty identifier tagged with its kind.
///
/// The value is raw bytes: header values need not be UTF-8, and two tokens
/// that differ in any byte must never share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    kind: IdentifierKind,
    value: Vec<u8>,
}

impl Identifier {
    /// Create an identifier, returning `None` for an empty value.
    pub fn new(kind: IdentifierKind, value: impl Into<Vec<u8>>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            return None;
        }
        Some(Self { kind, value })
    }

    /// An IP identifier for `host`.
    pub fn ip(host: impl Into<Vec<u8>>) -> Option<Self> {
        Self::new(IdentifierKind::Ip, host)
    }

    /// A token identifier, kept verbatim.
    pub fn token(token: impl Into<Vec<u8>>) -> Option<Self> {
        Self::new(IdentifierKind::Token, token)
    }

    /// The kind of this identifier.
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// The identifier value as used in storage keys.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The value as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Non-printable bytes are escaped so distinct values log distinctly.
        write!(f, "{}={}", self.kind, self.value.escape_ascii())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_identifier_rejected() {
        assert!(Identifier::ip("").is_none());
        assert!(Identifier::token("").is_none());
    }

    #[test]
    fn test_token_kept_verbatim() {
        let id = Identifier::token(" Mixed Case ").unwrap();
        assert_eq!(id.kind(), IdentifierKind::Token);
        assert_eq!(id.value(), b" Mixed Case ");
        assert_eq!(id.as_str(), Some(" Mixed Case "));
    }

    #[test]
    fn test_non_utf8_token_kept_byte_for_byte() {
        let a = Identifier::token(b"tok\xff".to_vec()).unwrap();
        let b = Identifier::token(b"tok\xfe".to_vec()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.value(), b"tok\xff");
        assert_eq!(a.as_str(), None);
        assert_eq!(a.to_string(), "TOKEN=tok\\xff");
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_display() {
        assert_eq!(Identifier::ip("192.0.2.1").unwrap().to_string(), "IP=192.0.2.1");
        assert_eq!(Identifier::token("abc").unwrap().to_string(), "TOKEN=abc");
    }

    #[test]
    fn test_equality() {
        assert_eq!(Identifier::ip("10.0.0.1"), Identifier::ip("10.0.0.1"));
        assert_ne!(Identifier::ip("k"), Identifier::token("k"));
    }
}
