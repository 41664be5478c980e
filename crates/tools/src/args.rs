//! Argument extraction shared by the local tools.

use serde_json::{Map, Value};
use vaultpilot_core::ToolContext;
use vaultpilot_core::error::ToolError;

pub(crate) type Args = Map<String, Value>;

pub(crate) fn required_str<'a>(args: &'a Args, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

pub(crate) fn optional_str<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn flag(args: &Args, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn optional_usize(args: &Args, key: &str) -> Option<usize> {
    args.get(key)
        .and_then(Value::as_u64)
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
}

/// Dry-run is requested either by the caller (approval preview) or by the model.
pub(crate) fn dry_run(args: &Args, ctx: &ToolContext) -> bool {
    ctx.dry_run || flag(args, "dry_run")
}
