use thiserror::Error;

macro_rules! invalid_ir {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidIr {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidIr {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Errors only arise while *constructing* IR: declaring conflicting symbols
/// or installing a function body that fails validation. The analyses
/// themselves are total - an unknown callee or an exhausted merge budget
/// degrades precision but never produces an error.
///
/// # Error Categories
///
/// ## Symbol Errors
/// - [`Error::DuplicateFunction`] - A function name was declared twice
/// - [`Error::DuplicateGlobal`] - A global name was declared twice
///
/// ## Body Validation Errors
/// - [`Error::InvalidIr`] - A body references out-of-range values, unknown
///   callees or globals, or disagrees with a signature on pointer-likeness
/// - [`Error::ArityMismatch`] - A direct call passes the wrong number of
///   arguments
///
/// # Examples
///
/// ```rust,no_run
/// use refscope::{Error, ir::{Module, Type, FunctionFlags}};
///
/// let mut module = Module::new();
/// module.declare_function("f", vec![], Type::Void, FunctionFlags::empty())?;
/// match module.declare_function("f", vec![], Type::Void, FunctionFlags::empty()) {
///     Err(Error::DuplicateFunction(name)) => {
///         eprintln!("`{}` is already declared", name);
///     }
///     other => {
///         other?;
///     }
/// }
/// # Ok::<(), refscope::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A function with this name is already declared in the module.
    #[error("A function named `{0}` is already declared")]
    DuplicateFunction(String),

    /// A global with this name is already declared in the module.
    #[error("A global named `{0}` is already declared")]
    DuplicateGlobal(String),

    /// A function body failed validation.
    ///
    /// The error includes the source location where the problem was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was invalid
    /// * `file` - Source file in which the error was detected
    /// * `line` - Source line in which the error was detected
    #[error("Invalid IR - {file}:{line}: {message}")]
    InvalidIr {
        /// The message to be printed for the InvalidIr error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A direct call passes a different number of arguments than the callee
    /// declares.
    #[error("Call from `{caller}` to `{callee}` passes {found} arguments, expected {expected}")]
    ArityMismatch {
        /// The calling function.
        caller: String,
        /// The called function.
        callee: String,
        /// The callee's declared parameter count.
        expected: usize,
        /// The number of arguments at the call site.
        found: usize,
    },
}
