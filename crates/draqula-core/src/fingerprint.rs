//! Request fingerprinting.
//!
//! A [`Fingerprint`] identifies a logical request: two requests with the same
//! document (modulo whitespace), the same variables (in any key order) and
//! the same operation name always map to the same fingerprint.
//!
//! The digest is SHA-256 over:
//! - the document with runs of whitespace and comments collapsed to a single
//!   space (string and block-string literals are kept verbatim)
//! - the variables serialized with object keys sorted recursively
//! - the operation name, if any

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::SerializationError;
use crate::request::GraphQLRequest;

/// A deterministic identity for a request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a document with already-serialized variables.
    pub fn new(document: &str, variables: Option<&Value>, operation_name: Option<&str>) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(normalize_document(document).as_bytes());
        // Field separator so that document/variables boundaries cannot shift.
        hasher.update([0u8]);

        match variables {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) if map.is_empty() => {}
            Some(vars) => {
                let canonical = canonicalize(vars);
                hasher.update(canonical.to_string().as_bytes());
            }
        }
        hasher.update([0u8]);

        if let Some(name) = operation_name {
            hasher.update(name.as_bytes());
        }

        Self(hasher.finalize().into())
    }

    /// Fingerprint a request.
    pub fn of(request: &GraphQLRequest) -> Self {
        Self::new(
            &request.query,
            request.variables.as_ref(),
            request.operation_name.as_deref(),
        )
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes only.
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

/// Fingerprint a document and arbitrary serializable variables.
///
/// # Errors
///
/// Returns [`SerializationError`] if `variables` cannot be represented as
/// JSON (for example a map with non-string keys).
///
/// # Example
///
/// ```
/// use draqula_core::fingerprint;
/// use serde_json::json;
///
/// let a = fingerprint("query Q($a: Int, $b: Int) { f }", &json!({"a": 1, "b": 2})).unwrap();
/// let b = fingerprint("query Q($a: Int, $b: Int)   { f }", &json!({"b": 2, "a": 1})).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn fingerprint<V>(document: &str, variables: &V) -> Result<Fingerprint, SerializationError>
where
    V: Serialize + ?Sized,
{
    let variables = serde_json::to_value(variables)?;
    Ok(Fingerprint::new(document, Some(&variables), None))
}

/// Collapse insignificant whitespace and drop comments, leaving string
/// literals untouched.
fn normalize_document(document: &str) -> String {
    let bytes = document.as_bytes();
    let mut out = String::with_capacity(document.len());
    let mut gap = false;
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && !matches!(bytes[i], b'\n' | b'\r') {
                    i += 1;
                }
                gap = true;
                continue;
            }
            b if b.is_ascii_whitespace() => {
                i += 1;
                gap = true;
                continue;
            }
            b'"' => i = literal_end(bytes, i),
            _ => {
                while i < bytes.len()
                    && !matches!(bytes[i], b'#' | b'"')
                    && !bytes[i].is_ascii_whitespace()
                {
                    i += 1;
                }
            }
        }
        if gap && !out.is_empty() {
            out.push(' ');
        }
        gap = false;
        // Token boundaries are ASCII bytes or the end, so always char boundaries.
        out.push_str(&document[start..i]);
    }
    out
}

/// Index just past the string literal opening at `start`.
///
/// Unterminated literals run to the end of the line (plain strings) or of
/// the document (block strings).
fn literal_end(bytes: &[u8], start: usize) -> usize {
    if bytes[start..].starts_with(br#"""""#) {
        let mut i = start + 3;
        while i < bytes.len() {
            if bytes[i..].starts_with(br#"\""""#) {
                i += 4;
            } else if bytes[i..].starts_with(br#"""""#) {
                return i + 3;
            } else {
                i += 1;
            }
        }
        return bytes.len();
    }

    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            b'\n' | b'\r' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Sort JSON object keys recursively.
pub(crate) fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| *k);
            let sorted_map: Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}
