use std::error::Error;
use std::fmt;

/// Errors raised before or at the start of iteration. Numeric trouble inside
/// the iteration is never raised as an error: it is reported through the
/// status code of the finished solve, so that callers can still inspect the
/// partial result.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Malformed setup: bad dimensions, wrong bound-list length, lower > upper,
    /// initial guess of the wrong length, unknown option id.
    Configuration(String),
    /// The residual/Jacobian capability is missing or returned arrays of the
    /// wrong shape.
    Capability(String),
}

impl SolverError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        SolverError::Configuration(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        SolverError::Capability(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SolverError::Configuration(_))
    }

    pub fn is_capability(&self) -> bool {
        matches!(self, SolverError::Capability(_))
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            SolverError::Capability(msg) => write!(f, "capability error: {}", msg),
        }
    }
}

impl Error for SolverError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let conf = SolverError::configuration("Nvars must be positive");
        assert!(conf.is_configuration());
        assert!(!conf.is_capability());

        let cap = SolverError::capability("evaluate() is not implemented");
        assert!(cap.is_capability());
        assert!(!cap.is_configuration());
    }

    #[test]
    fn test_error_display() {
        let conf = SolverError::configuration("bound list length 2 != 3");
        assert_eq!(
            conf.to_string(),
            "configuration error: bound list length 2 != 3"
        );
    }
}
