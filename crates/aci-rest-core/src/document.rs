//! Wire documents and tree search
//!
//! Requests and responses share one shape:
//!
//! ```text
//! { "<class>": { "attributes": { "<name>": "<value>", ... },
//!                "children": [ { "<childClass>": { ... } }, ... ] } }
//! ```
//!
//! Responses are additionally wrapped as `{"imdata": [ <document>, ... ]}`,
//! with `{"imdata": [{"error": {"attributes": {"code": .., "text": ..}}}]}`
//! on failure. [`Document`] is read-only: it is searched, never mutated.

use serde_json::Value;

/// A raw response from the remote store
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

/// Structured error carried inside a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Error code, e.g. "107"
    pub code: String,
    /// Human readable text, verbatim
    pub text: String,
}

impl Document {
    /// Wrap a raw JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The underlying JSON value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consume the document and return the underlying JSON value
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Follow a path of object keys from the root
    pub fn search(&self, path: &[&str]) -> Option<&Value> {
        search(&self.0, path)
    }

    /// The first entry of the `imdata` list, if any
    pub fn first_entry(&self) -> Option<&Value> {
        self.search(&["imdata"])?.as_array()?.first()
    }

    /// Whether the response reports that no such object exists
    ///
    /// This is the case when the `imdata` list is empty or its first entry
    /// is an empty object.
    pub fn is_empty(&self) -> bool {
        match self.first_entry() {
            None => self.search(&["imdata"]).is_some_and(|v| v.is_array()),
            Some(entry) => entry.as_object().is_some_and(|m| m.is_empty()),
        }
    }

    /// The error document, if the response carries one
    pub fn error(&self) -> Option<RemoteError> {
        let entry = find_in_array(&self.0, &["imdata"], |entry| entry.get("error").is_some())?;
        let attributes = search(entry, &["error", "attributes"])?;

        Some(RemoteError {
            code: attributes.get("code").map(scalar_string).unwrap_or_default(),
            text: attributes.get("text").map(scalar_string).unwrap_or_default(),
        })
    }

    /// The object of the given class in the first `imdata` entry
    pub fn object(&self, class_name: &str) -> Option<&Value> {
        self.first_entry()?.get(class_name)
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Follow a path of object keys from `value`
pub fn search<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(*key))
}

/// Find the first element of the array at `path` that satisfies `predicate`
pub fn find_in_array<'a, P>(value: &'a Value, path: &[&str], mut predicate: P) -> Option<&'a Value>
where
    P: FnMut(&Value) -> bool,
{
    search(value, path)?
        .as_array()?
        .iter()
        .find(|element| predicate(element))
}

/// Render a JSON value as a plain attribute string
///
/// Strings are returned as-is; single element arrays are unwrapped; any other
/// value is rendered and stripped of surrounding brackets and quotes.
pub fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) if items.len() == 1 => scalar_string(&items[0]),
        other => strip_artifacts(&other.to_string()).to_string(),
    }
}

/// Strip one level of surrounding square brackets, then surrounding quotes
pub fn strip_artifacts(raw: &str) -> &str {
    let s = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}
