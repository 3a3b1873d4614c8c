//! Correlation id type for request/response matching.

use std::fmt;

use ulid::Ulid;

/// Maximum accepted length of a correlation id on the wire.
pub(crate) const MAX_CORRELATION_ID_LEN: usize = 64;

/// Identifier tying a worker response to the request that caused it.
///
/// Ids generated by the bridge are ULIDs. Ids received from the worker are
/// kept verbatim so that responses to unknown ids can still be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh, unique correlation id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn is_well_formed(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_CORRELATION_ID_LEN
            && !self.0.chars().any(char::is_control)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_well_formed() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert!(a.is_well_formed());
        assert_eq!(a.as_str().len(), 26);
    }

    #[test]
    fn rejects_empty_and_oversized_ids() {
        assert!(!CorrelationId::from("").is_well_formed());
        assert!(!CorrelationId::from("x".repeat(65)).is_well_formed());
        assert!(!CorrelationId::from("abc\n").is_well_formed());
        assert!(CorrelationId::from("req-1").is_well_formed());
    }
}
