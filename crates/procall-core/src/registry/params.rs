//! Positional argument helpers for handlers.
//!
//! Arguments are validated against the descriptor before a handler runs, so
//! these only fail when a handler reads a position its signature does not
//! declare.

use super::function::HandlerError;
use crate::handles::Handle;
use crate::value::Value;

fn arg<'a>(args: &'a [Value], index: usize) -> Result<&'a Value, HandlerError> {
    args.get(index)
        .ok_or_else(|| HandlerError::InvalidArguments(format!("Missing argument {}", index)))
}

fn mismatch(index: usize, expected: &str, got: &Value) -> HandlerError {
    HandlerError::InvalidArguments(format!(
        "Argument {}: expected {}, got {}",
        index,
        expected,
        got.value_type()
    ))
}

/// Extract a required string argument.
pub fn require_str(args: &[Value], index: usize) -> Result<&str, HandlerError> {
    let value = arg(args, index)?;
    value.as_str().ok_or_else(|| mismatch(index, "String", value))
}

/// Extract a required byte-buffer argument.
pub fn require_binary(args: &[Value], index: usize) -> Result<&[u8], HandlerError> {
    let value = arg(args, index)?;
    value.as_bytes().ok_or_else(|| mismatch(index, "Binary", value))
}

pub fn require_u32(args: &[Value], index: usize) -> Result<u32, HandlerError> {
    let value = arg(args, index)?;
    value.as_u32().ok_or_else(|| mismatch(index, "UInt32", value))
}

pub fn require_i32(args: &[Value], index: usize) -> Result<i32, HandlerError> {
    let value = arg(args, index)?;
    value.as_i32().ok_or_else(|| mismatch(index, "Int32", value))
}

pub fn require_u64(args: &[Value], index: usize) -> Result<u64, HandlerError> {
    let value = arg(args, index)?;
    value.as_u64().ok_or_else(|| mismatch(index, "UInt64", value))
}

pub fn require_i64(args: &[Value], index: usize) -> Result<i64, HandlerError> {
    let value = arg(args, index)?;
    value.as_i64().ok_or_else(|| mismatch(index, "Int64", value))
}

pub fn require_f64(args: &[Value], index: usize) -> Result<f64, HandlerError> {
    let value = arg(args, index)?;
    value.as_f64().ok_or_else(|| mismatch(index, "Double", value))
}

/// Extract a handle argument (carried as `UInt64`).
pub fn require_handle(args: &[Value], index: usize) -> Result<Handle, HandlerError> {
    require_u64(args, index).map(Handle::from_raw)
}
