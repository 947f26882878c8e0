macro_rules! violation {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can
/// potentially return.
///
/// Conservative analysis outcomes (an unexpanded call, an open iteration set, a
/// disagreeing confluence) are *not* errors: they resolve to `Unresolved` lattice
/// values and the analysis carries on. The variants here cover the remaining failure
/// modes, which indicate defects rather than recoverable conditions.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::InvalidIr`] - The program handed to the builder or the engine is not well formed
///
/// ## Analysis Contract Errors
/// - [`Error::InvariantViolation`] - A monotonicity or structural invariant was broken
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The input program violates a well-formedness rule of the IR.
    ///
    /// Raised by the program builder (a block without a terminator, a function
    /// without blocks, an operand naming a missing value) and by engine entry
    /// points handed ids that do not exist.
    #[error("Invalid IR - {0}")]
    InvalidIr(String),

    /// A structural invariant of the analysis was violated.
    ///
    /// The improvement lattice is set-once: re-deriving a *different* value for an
    /// already-resolved scoped value is a defect in the analysis, not a state
    /// transition, and is surfaced loudly instead of silently corrupting results.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant violation - {file}:{line}: {message}")]
    InvariantViolation {
        /// The message to be printed for the violation
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}

#[cfg(test)]
mod tests {
    use crate::Error;

    #[test]
    fn test_violation_macro_plain() {
        let err = violation!("lattice overwrite");
        match err {
            Error::InvariantViolation { message, file, line } => {
                assert_eq!(message, "lattice overwrite");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_violation_macro_format() {
        let err = violation!("value {} in context {}", 3, 7);
        assert!(err.to_string().contains("value 3 in context 7"));
    }

    #[test]
    fn test_invalid_ir_display() {
        let err = Error::InvalidIr("block b2 has no terminator".to_string());
        assert_eq!(err.to_string(), "Invalid IR - block b2 has no terminator");
    }
}
