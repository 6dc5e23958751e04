//! The document carried by command and event packets.
//!
//! A [`Message`] maps keys to one of three value shapes: a scalar string, a
//! nested [`Message`] (a section) or an ordered list of strings. Keys are
//! unique within one nesting level and iterate in first-insertion order.

use std::fmt;

use indexmap::IndexMap;

use crate::codec;
use crate::error::{CommandFailed, ProtocolError, TypeMismatch};

/// Longest key the wire format can carry (1-byte length field).
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Longest scalar or list item the wire format can carry (2-byte length field).
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// The shape of a [`Value`], used in [`TypeMismatch`] errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Scalar,
    Section,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Scalar => "scalar",
            ValueKind::Section => "section",
            ValueKind::List => "list",
        };
        f.write_str(name)
    }
}

/// A single value stored under a message key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    Section(Message),
    List(Vec<String>),
}

impl Value {
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(_) => ValueKind::Scalar,
            Value::Section(_) => ValueKind::Section,
            Value::List(_) => ValueKind::List,
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Value::Scalar(s) => check_value_len(s),
            Value::Section(_) => Ok(()),
            Value::List(items) => items.iter().try_for_each(|item| check_value_len(item)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s)
    }
}

impl From<Message> for Value {
    fn from(m: Message) -> Self {
        Value::Section(m)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items)
    }
}

impl From<Vec<&str>> for Value {
    fn from(items: Vec<&str>) -> Self {
        Value::List(items.into_iter().map(str::to_string).collect())
    }
}

/// An ordered key/value document.
#[derive(Debug, Clone, Default)]
pub struct Message {
    entries: IndexMap<String, Value>,
}

impl Message {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// A replaced key keeps its original position. Fails if the key is empty
    /// or longer than [`MAX_KEY_LEN`], or if a scalar or list item is longer
    /// than [`MAX_VALUE_LEN`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), ProtocolError> {
        let key = key.into();
        check_key_len(&key)?;
        let value = value.into();
        value.validate()?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Builder form of [`Message::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self, ProtocolError> {
        self.set(key, value)?;
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Mutable access to a field. Lengths are checked again on encode.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Read a scalar field.
    ///
    /// Returns `Ok(None)` when the key is absent and `Ok(Some(""))` when it is
    /// present with an empty value.
    pub fn scalar(&self, key: &str) -> Result<Option<&str>, TypeMismatch> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::Scalar(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(key, ValueKind::Scalar, other)),
        }
    }

    /// Read a section field.
    pub fn section(&self, key: &str) -> Result<Option<&Message>, TypeMismatch> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::Section(m)) => Ok(Some(m)),
            Some(other) => Err(mismatch(key, ValueKind::Section, other)),
        }
    }

    /// Read a list field.
    pub fn list(&self, key: &str) -> Result<Option<&[String]>, TypeMismatch> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Value::List(items)) => Ok(Some(items)),
            Some(other) => Err(mismatch(key, ValueKind::List, other)),
        }
    }

    /// Remove a key, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the daemon's `success`/`errmsg` convention.
    ///
    /// Responses without a `success` key are treated as successful.
    pub fn check_success(&self) -> Result<(), CommandFailed> {
        match self.entries.get("success") {
            Some(Value::Scalar(s)) if s == "no" => {
                let message = match self.entries.get("errmsg") {
                    Some(Value::Scalar(m)) if !m.is_empty() => m.clone(),
                    _ => "command failed".to_string(),
                };
                Err(CommandFailed { message })
            }
            _ => Ok(()),
        }
    }

    /// Serialize to the wire element stream.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        codec::encode_message(self)
    }

    /// Parse a wire element stream.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        codec::decode_message(bytes)
    }

    // Used by the decoder, which reads keys and values from length-checked
    // fields and must keep last-write-wins without re-validating.
    pub(crate) fn insert_decoded(&mut self, key: String, value: Value) {
        self.entries.insert(key, value);
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for (key, value) in &self.entries {
            match value {
                Value::Scalar(s) => writeln!(f, "{pad}{key} = {s}")?,
                Value::Section(m) => {
                    writeln!(f, "{pad}{key} {{")?;
                    m.fmt_indented(f, depth + 1)?;
                    writeln!(f, "{pad}}}")?;
                }
                Value::List(items) => {
                    writeln!(f, "{pad}{key} = [")?;
                    for item in items {
                        writeln!(f, "{pad}  {item}")?;
                    }
                    writeln!(f, "{pad}]")?;
                }
            }
        }
        Ok(())
    }
}

// Equality is order-sensitive: two documents with the same entries in a
// different order encode to different bytes.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.entries.iter().eq(other.entries.iter())
    }
}

impl Eq for Message {}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

fn mismatch(key: &str, expected: ValueKind, found: &Value) -> TypeMismatch {
    TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

fn check_key_len(key: &str) -> Result<(), ProtocolError> {
    if key.is_empty() {
        return Err(ProtocolError::Malformed("empty key".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ProtocolError::TooLong {
            what: "key",
            len: key.len(),
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}

fn check_value_len(value: &str) -> Result<(), ProtocolError> {
    if value.len() > MAX_VALUE_LEN {
        return Err(ProtocolError::TooLong {
            what: "value",
            len: value.len(),
            max: MAX_VALUE_LEN,
        });
    }
    Ok(())
}
