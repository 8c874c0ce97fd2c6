//! cpscheme - a continuation-passing Scheme runtime
//!
//! This crate compiles a small Scheme dialect into bytecode for a virtual machine
//! that never grows the host call stack. Every program is first rewritten into
//! continuation-passing style, so each call is a tail call that hands its result to
//! an explicit continuation. The VM then executes the whole program inside a single
//! reusable frame: invoking a continuation overwrites that frame in place.
//!
//! ```scheme
//! (define (fib n)
//!   (if (< n 2)
//!       n
//!       (+ (fib (- n 1)) (fib (- n 2)))))
//! (fib 10)            ; => 55
//! (call/cc (lambda (k) (+ 1 (k 42))))  ; => 42
//! ```
//!
//! ## Pipeline
//!
//! source text → [`reader`] → [`builder`] → [`cps`] → [`codegen`] → [`vm`]
//!
//! The boundary between the compiler and the VM is the [`code::CompiledUnit`]: an
//! entry continuation plus the table of prototypes it can build closures from.
//! The [`disasm`] module (and [`artifact`] with the `json` feature) read that
//! format for tooling.
//!
//! ## Modules
//!
//! - `value`: runtime values and interned symbols
//! - `module`: the global environment shared by compiled code
//! - `ast`, `builder`: direct-style syntax tree and the special-form builder
//! - `cps`: continuation-passing rewriter
//! - `opcode`, `code`, `codegen`: instruction set, prototypes, code generator
//! - `vm`, `prelude`: the single-frame virtual machine and its builtin procedures
//! - `interp`: the end-to-end interpreter facade

use std::fmt;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 64;

/// Default capacity of the VM frame stack (locals + upvalues + temporaries)
pub const DEFAULT_STACK_SIZE: usize = 256;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the datum was complete (unclosed parens, dangling quote)
    Incomplete,
    /// Nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Valid Scheme syntax that this dialect does not support (strings, chars, floats)
    Unsupported,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset into the input where the error was detected
    pub position: usize,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, position: usize) -> Self {
        ParseError {
            kind,
            message: message.into(),
            position,
            context: None,
            found: None,
        }
    }

    /// Create a ParseError with context extracted from input at the error offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }
        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.split_whitespace().next())
            .map(|token| token.chars().take(16).collect());

        ParseError {
            kind,
            message: message.into(),
            position: error_offset,
            context: Some(display_context),
            found,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ParseError: {} (at byte {})", self.message, self.position)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error taxonomy shared by the front end, the compiler and the VM.
///
/// Runtime errors carry the operation that raised them (an instruction rendering
/// such as `LOAD(3)` or a builtin name) so a fault can be reproduced from the
/// disassembly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Parse(ParseError),

    #[error("SyntaxError: {message}{}", in_form(.form))]
    Syntax {
        message: String,
        form: Option<String>,
    },

    #[error("CompileError: {0}")]
    Compile(String),

    #[error("TypeError: {operation}: expected {expected}, got {got}")]
    Type {
        expected: String,
        got: String,
        operation: String,
    },

    #[error("ValueError: {operation}: {reason} ({got})")]
    Value {
        reason: String,
        got: String,
        operation: String,
    },

    #[error("ArityError: {name}: expected {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("NameError: {operation}: undefined global variable '{name}'")]
    Name { name: String, operation: String },

    #[error("ExecutionError: {operation}: {message}")]
    Execution { message: String, operation: String },
}

impl Error {
    pub fn syntax(message: impl Into<String>, form: &Value) -> Self {
        Error::Syntax {
            message: message.into(),
            form: Some(form.to_string()),
        }
    }

    pub fn type_error(expected: impl Into<String>, got: &Value, operation: impl Into<String>) -> Self {
        Error::Type {
            expected: expected.into(),
            got: got.to_string(),
            operation: operation.into(),
        }
    }

    pub fn value_error(reason: impl Into<String>, got: &Value, operation: impl Into<String>) -> Self {
        Error::Value {
            reason: reason.into(),
            got: got.to_string(),
            operation: operation.into(),
        }
    }

    pub fn undefined(name: impl Into<String>, operation: impl Into<String>) -> Self {
        Error::Name {
            name: name.into(),
            operation: operation.into(),
        }
    }

    pub fn execution(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Error::Execution {
            message: message.into(),
            operation: operation.into(),
        }
    }
}

fn in_form(form: &Option<String>) -> String {
    form.as_ref().map(|f| format!(" in {f}")).unwrap_or_default()
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod ast;
pub mod builder;
pub mod code;
pub mod codegen;
pub mod cps;
pub mod disasm;
pub mod interp;
pub mod module;
pub mod opcode;
pub mod prelude;
pub mod value;
pub mod vm;

#[cfg(feature = "json")]
pub mod artifact;

#[cfg(feature = "reader")]
pub mod reader;

pub use code::{CompiledUnit, Continuation, Proto, UpvalueDescriptor};
pub use interp::{Config, Interpreter};
pub use module::Module;
pub use value::{Symbol, Value};
pub use vm::{Frame, FrameState};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{sym, val};

    #[test]
    fn test_error_display() {
        let test_cases = vec![
            (
                Error::syntax("bad form", &Value::list([sym("if")])),
                "SyntaxError: bad form in (if)",
            ),
            (
                Error::Syntax {
                    message: "empty".into(),
                    form: None,
                },
                "SyntaxError: empty",
            ),
            (
                Error::type_error("pair", &val(1), "CAR() at main:2"),
                "TypeError: CAR() at main:2: expected pair, got 1",
            ),
            (
                Error::value_error("divide by zero", &val(7), "IDIV() at main:6"),
                "ValueError: IDIV() at main:6: divide by zero (7)",
            ),
            (
                Error::undefined("x", "GETGLOBAL(0) at main:0"),
                "NameError: GETGLOBAL(0) at main:0: undefined global variable 'x'",
            ),
            (
                Error::execution("stack overflow", "INT(1) at main:0"),
                "ExecutionError: INT(1) at main:0: stack overflow",
            ),
            (
                Error::Arity {
                    name: "f".into(),
                    expected: 2,
                    got: 1,
                },
                "ArityError: f: expected 2 arguments, got 1",
            ),
        ];
        for (i, (err, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(err.to_string(), expected, "Error display #{}", i + 1);
        }
    }

    #[test]
    fn test_parse_error_converts() {
        let err: Error = ParseError::new(ParseErrorKind::Incomplete, "unexpected end", 3).into();
        assert_eq!(err.to_string(), "ParseError: unexpected end (at byte 3)");
        assert!(matches!(err, Error::Parse(ParseError { kind: ParseErrorKind::Incomplete, .. })));
    }
}
