/*!
 * Error Types
 * Construction failures of the nodump allocator, with thiserror and miette support
 */

use miette::Diagnostic;
use thiserror::Error;

/// Result type for allocator setup operations
pub type AllocatorResult<T> = Result<T, AllocatorError>;

/// Why a nodump allocator could not be produced
///
/// Only construction reports errors. Once an allocator exists, allocation
/// failure is a `None` from `allocate`, and teardown failures are logged.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum AllocatorError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(nodump::invalid_argument),
        help("Check the options passed to the allocator factory.")
    )]
    InvalidArgument(String),

    #[error("Not supported: {0}")]
    #[diagnostic(
        code(nodump::not_supported),
        help("Dump exclusion needs jemalloc >= 5 with extent hooks and MADV_DONTDUMP. Fall back to a regular allocator.")
    )]
    NotSupported(String),

    #[error("Incomplete setup: {op} failed, error code: {code}")]
    #[diagnostic(
        code(nodump::incomplete),
        help("A jemalloc control call failed at runtime. The error code is the errno value returned by mallctl.")
    )]
    Incomplete { op: String, code: i32 },
}

impl AllocatorError {
    /// Build an `Incomplete` error for a failed control call
    pub fn incomplete(op: impl Into<String>, code: i32) -> Self {
        AllocatorError::Incomplete {
            op: op.into(),
            code,
        }
    }

    /// Underlying error code, if the failure came from a control call
    pub fn code(&self) -> Option<i32> {
        match self {
            AllocatorError::Incomplete { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the failure is a static platform limitation
    ///
    /// Callers use this to decide between falling back to a plain allocator
    /// and reporting a real setup problem.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, AllocatorError::NotSupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_carries_code() {
        let err = AllocatorError::incomplete("arenas.create", 12);
        assert_eq!(err.code(), Some(12));
        assert!(!err.is_not_supported());
        assert_eq!(
            err.to_string(),
            "Incomplete setup: arenas.create failed, error code: 12"
        );
    }

    #[test]
    fn test_other_variants_have_no_code() {
        assert_eq!(AllocatorError::NotSupported("x".into()).code(), None);
        assert_eq!(AllocatorError::InvalidArgument("y".into()).code(), None);
        assert!(AllocatorError::NotSupported("x".into()).is_not_supported());
    }

    #[test]
    fn test_diagnostic_codes() {
        let err = AllocatorError::incomplete("arena.3.extent_hooks", 14);
        let code = Diagnostic::code(&err).map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("nodump::incomplete"));
    }
}
