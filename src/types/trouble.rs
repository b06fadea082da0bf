//! Diagnostic trouble code types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity bucket of a trouble code.
///
/// Assigned from fixed membership lists, not from any ISO severity field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// A stored diagnostic trouble code such as `P0106`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TroubleCode {
    /// Five-character code: category letter plus four digits.
    pub code: String,
    /// Human-readable description.
    pub description: String,
    /// Severity bucket.
    pub severity: Severity,
}

impl TroubleCode {
    /// System category letter (`P`, `C`, `B` or `U`), if the code has one.
    #[must_use]
    pub fn category(&self) -> Option<char> {
        self.code.chars().next()
    }
}

impl fmt::Display for TroubleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.code, self.severity, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_of_empty_code_is_absent() {
        let code = TroubleCode {
            code: String::new(),
            description: String::new(),
            severity: Severity::Low,
        };
        assert_eq!(code.category(), None);

        let code = TroubleCode {
            code: "U0100".into(),
            ..code
        };
        assert_eq!(code.category(), Some('U'));
    }
}
