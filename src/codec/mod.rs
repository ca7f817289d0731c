//! Serialization boundary between driver and kernel, plus the
//! source-text generation strategy used to talk to an interpreter.

use serde_json::Value;

use crate::error::{Error, Result};

pub mod python;

pub use python::PythonCodeGen;

/// Mime type under which the kernel reports transferred payloads.
pub const PAYLOAD_MIME: &str = "application/x-nbtest-payload";

/// A value serialized for transfer, as JSON text. Opaque to callers;
/// produced locally by [`encode_payload`] or remotely by the kernel's
/// encode helper, and turned back into a value by [`decode_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(String);

impl Payload {
    pub fn from_text(text: String) -> Self {
        Payload(text)
    }

    pub fn as_text(&self) -> &str {
        &self.0
    }
}

/// Serialize a local value into a transferable payload.
pub fn encode_payload(value: &Value) -> Result<Payload> {
    let text = serde_json::to_string(value).map_err(|e| Error::encoding(e.to_string()))?;
    Ok(Payload(text))
}

/// Local-side inverse of a remote transfer.
pub fn decode_payload(payload: &Payload) -> Result<Value> {
    serde_json::from_str(&payload.0).map_err(|e| Error::encoding(e.to_string()))
}

/// Parameters for an injected call-interception construct.
#[derive(Debug)]
pub struct TrackerSpec<'a> {
    /// Name the wrapped callable is bound to inside the interpreter.
    pub target: &'a str,
    pub class_name: &'a str,
    pub instance_name: &'a str,
    /// Parameter names to keep in recorded calls (ignored with `all_parameters`).
    pub parameters: &'a [String],
    pub all_parameters: bool,
    pub return_values: bool,
}

/// Interpreter-facing source-text generator.
///
/// Everything the crate injects into a kernel goes through this trait, so
/// a different target language only needs a new backend, not changes to
/// the reference or tracking layers.
pub trait CodeGen: Send + Sync {
    /// Source text that reconstructs `value` inside the interpreter.
    fn literal(&self, value: &Value) -> Result<String>;

    /// Like [`CodeGen::literal`], but from an already-encoded payload.
    fn payload_literal(&self, payload: &Payload) -> String;

    fn attr(&self, parent: &str, name: &str) -> String;

    fn item(&self, parent: &str, key: &str) -> String;

    fn call(&self, target: &str, args: &[String], kwargs: &[(String, String)]) -> String;

    fn assign(&self, name: &str, expr: &str) -> String;

    /// Wrap an expression so its value is reported back as a payload.
    fn encode_expr(&self, expr: &str) -> String;

    /// The interpreter's length operator applied to `expr`.
    fn length(&self, expr: &str) -> String;

    /// Source for the call-interception construct, including the
    /// statements that instantiate it and rebind the target.
    fn tracker_source(&self, spec: &TrackerSpec<'_>) -> String;
}
