//! Error types and the scoped error context used by the coders.

use std::cell::RefCell;

/// Definition errors found while resolving a schema or analyzing a record/set layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Duplicate type name: {0}")]
    DuplicateType(String),
    #[error("Unknown type: {0}")]
    UnknownType(String),
    #[error("{type_name}: unknown field '{field}'")]
    UnknownField { type_name: String, field: String },
    #[error("{type_name}.{field}: field refers to itself in {attribute}")]
    SelfReference {
        type_name: String,
        field: String,
        attribute: &'static str,
    },
    #[error("{type_name}: crosstag dependencies form a cycle through {fields:?}")]
    DelayedDecodeCycle { type_name: String, fields: Vec<String> },
    #[error("{type_name}.{field}: {reason}")]
    Field {
        type_name: String,
        field: String,
        reason: String,
    },
    #[error("{type_name}: {reason}")]
    Invalid { type_name: String, reason: String },
}

/// Category of a coding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Encoding an unbound value: caller contract violation.
    Unbound,
    /// Value does not match its type (wrong variant, bad enum name, out of range).
    InvalidValue,
    /// Not enough data; decoding may succeed with more bytes.
    IncompleteMessage,
    LengthError,
    /// Malformed data; permanent failure.
    InvalidMessage,
    /// A tag/presence predicate references an omitted field.
    OmittedTag,
    /// Data left over after a complete top-level decode.
    ExtraData,
    /// JSON: unexpected token. Distinguished result in silent mode.
    InvalidToken,
    UnknownType,
    UnsupportedCoding,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{context}{message}")]
pub struct CodecError {
    pub kind: ErrorKind,
    /// Concatenated error-context labels active when the error was raised.
    pub context: String,
    pub message: String,
}

impl CodecError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CodecError {
            kind,
            context: String::new(),
            message: message.into(),
        }
    }

    /// Truncated input: the caller may retry with more data.
    pub fn is_incomplete(&self) -> bool {
        self.kind == ErrorKind::IncompleteMessage
    }

    /// Permanently malformed input.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::InvalidMessage | ErrorKind::LengthError | ErrorKind::InvalidToken | ErrorKind::ExtraData
        )
    }
}

/// Stack of "While encoding type X: " labels.
///
/// [`ErrorContext::enter`] returns a guard that pops the label when dropped, so the stack
/// unwinds on every exit path (`?`, early return or panic).
#[derive(Debug, Default)]
pub struct ErrorContext {
    labels: RefCell<Vec<String>>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, label: String) -> ContextGuard<'_> {
        self.labels.borrow_mut().push(label);
        ContextGuard { ctx: self }
    }

    pub fn depth(&self) -> usize {
        self.labels.borrow().len()
    }

    pub fn describe(&self) -> String {
        self.labels.borrow().concat()
    }

    /// Build an error carrying the current context.
    pub fn error(&self, kind: ErrorKind, message: impl Into<String>) -> CodecError {
        CodecError {
            kind,
            context: self.describe(),
            message: message.into(),
        }
    }
}

#[must_use]
pub struct ContextGuard<'a> {
    ctx: &'a ErrorContext,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.ctx.labels.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails(ctx: &ErrorContext) -> Result<(), CodecError> {
        let _g = ctx.enter("Field 'b': ".to_string());
        Err(ctx.error(ErrorKind::InvalidMessage, "bad"))
    }

    #[test]
    fn labels_unwind_on_early_return() {
        let ctx = ErrorContext::new();
        let _outer = ctx.enter("While RAW-decoding type 'T': ".to_string());
        let err = fails(&ctx).expect_err("fails");
        assert_eq!(err.to_string(), "While RAW-decoding type 'T': Field 'b': bad");
        assert_eq!(ctx.depth(), 1);
    }
}
