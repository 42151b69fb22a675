use std::fmt;

/// Broad classification of a failure. Every error carries exactly one kind so
/// callers can match on it without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind
{
    /// Overlong, unterminated or overflowing LEB128 integer
    MalformedVarInt,
    /// Container signature does not match
    BadMagic,
    /// A declared size or offset runs past the end of the buffer
    TruncatedInput,
    /// An index points outside its table, or at an unusable slot
    DanglingReference,
    /// An index points at an entry of the wrong kind
    ResolverTypeMismatch,
    /// An instruction would read past the end of its code range
    CodeTruncated,
    /// A mutation the rebuild pipeline cannot express
    UnsupportedRebuildEdit,
    /// Unrecognised tag, value type or opcode
    UnknownTag,
}

#[macro_export]
macro_rules! err {
    ($kind:ident, $msg:literal) => {
        $crate::error::BytecodeError::new($crate::error::ErrorKind::$kind, $msg)
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::error::BytecodeError::new($crate::error::ErrorKind::$kind, &format!($fmtstr, $($args)*))
    };
}

#[macro_export]
macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err($crate::err!($kind, $msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err($crate::err!($kind, $fmtstr, $($args)*))
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeError
{
    kind: ErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl BytecodeError
{
    pub fn new(kind: ErrorKind, msg: &str) -> Self
    {
        BytecodeError {
            kind,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub fn with_context(base: BytecodeError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        BytecodeError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> ErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }
}

impl fmt::Display for BytecodeError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:?}: {}", self.kind, self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for BytecodeError {}

/// Attach context to the error side of a result as it propagates upwards.
pub(crate) trait ResultExt<T>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, BytecodeError>;
}

impl<T> ResultExt<T> for Result<T, BytecodeError>
{
    fn context<F: FnOnce() -> String>(self, f: F) -> Result<T, BytecodeError>
    {
        self.map_err(|e| BytecodeError::with_context(e, f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_chains_contexts() {
        let e = err!(DanglingReference, "type index {} out of range", 9);
        let e = BytecodeError::with_context(e, "proto_ids[2]".to_string());
        let e = BytecodeError::with_context(e, "classes.dex".to_string());
        assert_eq!(e.kind(), ErrorKind::DanglingReference);
        assert_eq!(
            e.to_string(),
            "DanglingReference: type index 9 out of range for proto_ids[2] of classes.dex"
        );
    }
}
