//! Binary codec for message documents.
//!
//! Wire format, one element after another:
//! ```text
//! SECTION_START(1) [key_len:1][key]      nested elements follow
//! SECTION_END(2)
//! KEY_VALUE(3)     [key_len:1][key][value_len:2][value]
//! LIST_START(4)    [key_len:1][key]      LIST_ITEMs follow
//! LIST_ITEM(5)     [value_len:2][value]
//! LIST_END(6)
//! ```
//! All multi-byte integers are big-endian.

use crate::error::ProtocolError;
use crate::message::{MAX_KEY_LEN, MAX_VALUE_LEN, Message, Value};

/// Element type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ElementType {
    SectionStart = 1,
    SectionEnd = 2,
    KeyValue = 3,
    ListStart = 4,
    ListItem = 5,
    ListEnd = 6,
}

impl TryFrom<u8> for ElementType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ElementType::SectionStart),
            2 => Ok(ElementType::SectionEnd),
            3 => Ok(ElementType::KeyValue),
            4 => Ok(ElementType::ListStart),
            5 => Ok(ElementType::ListItem),
            6 => Ok(ElementType::ListEnd),
            other => Err(ProtocolError::UnknownElementType(other)),
        }
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into its element stream.
///
/// # Errors
///
/// Only fails if a key or value exceeds its length field, which
/// [`Message::set`] already rules out.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    encode_entries(&mut buf, msg)?;
    Ok(buf)
}

fn encode_entries(buf: &mut Vec<u8>, msg: &Message) -> Result<(), ProtocolError> {
    for (key, value) in msg.iter() {
        match value {
            Value::Scalar(s) => {
                buf.push(ElementType::KeyValue as u8);
                write_key(buf, key)?;
                write_value(buf, s)?;
            }
            Value::Section(section) => {
                buf.push(ElementType::SectionStart as u8);
                write_key(buf, key)?;
                encode_entries(buf, section)?;
                buf.push(ElementType::SectionEnd as u8);
            }
            Value::List(items) => {
                buf.push(ElementType::ListStart as u8);
                write_key(buf, key)?;
                for item in items {
                    buf.push(ElementType::ListItem as u8);
                    write_value(buf, item)?;
                }
                buf.push(ElementType::ListEnd as u8);
            }
        }
    }
    Ok(())
}

/// Writes a 1-byte length prefix followed by the key bytes.
fn write_key(buf: &mut Vec<u8>, key: &str) -> Result<(), ProtocolError> {
    let len = u8::try_from(key.len()).map_err(|_| ProtocolError::TooLong {
        what: "key",
        len: key.len(),
        max: MAX_KEY_LEN,
    })?;
    buf.push(len);
    buf.extend_from_slice(key.as_bytes());
    Ok(())
}

/// Writes a 2-byte length prefix followed by the value bytes.
fn write_value(buf: &mut Vec<u8>, value: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::TooLong {
        what: "value",
        len: value.len(),
        max: MAX_VALUE_LEN,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Decodes an element stream into a [`Message`].
///
/// Open sections are tracked on an explicit stack instead of recursing.
///
/// # Errors
///
/// Returns [`ProtocolError`] on truncated input, unknown element tags, length
/// fields that run past the buffer, unbalanced section or list markers, and
/// text that is not UTF-8.
pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let mut reader = Reader::new(bytes);
    let mut root = Message::new();
    let mut open: Vec<(String, Message)> = Vec::new();

    while !reader.is_empty() {
        let element = ElementType::try_from(reader.u8()?)?;
        match element {
            ElementType::SectionStart => {
                let key = reader.key()?;
                open.push((key, Message::new()));
            }
            ElementType::SectionEnd => {
                let (key, section) = open.pop().ok_or_else(|| {
                    ProtocolError::Malformed("section end without matching start".to_string())
                })?;
                current(&mut root, &mut open).insert_decoded(key, Value::Section(section));
            }
            ElementType::KeyValue => {
                let key = reader.key()?;
                let value = reader.value()?;
                current(&mut root, &mut open).insert_decoded(key, Value::Scalar(value));
            }
            ElementType::ListStart => {
                let key = reader.key()?;
                let items = decode_list(&mut reader)?;
                current(&mut root, &mut open).insert_decoded(key, Value::List(items));
            }
            ElementType::ListItem | ElementType::ListEnd => {
                return Err(ProtocolError::Malformed(format!(
                    "{element:?} outside of a list"
                )));
            }
        }
    }

    if let Some((key, _)) = open.last() {
        return Err(ProtocolError::Malformed(format!(
            "section {key:?} is not terminated"
        )));
    }

    Ok(root)
}

fn decode_list(reader: &mut Reader<'_>) -> Result<Vec<String>, ProtocolError> {
    let mut items = Vec::new();
    loop {
        match ElementType::try_from(reader.u8()?)? {
            ElementType::ListItem => items.push(reader.value()?),
            ElementType::ListEnd => return Ok(items),
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "{other:?} inside a list"
                )));
            }
        }
    }
}

fn current<'a>(root: &'a mut Message, open: &'a mut [(String, Message)]) -> &'a mut Message {
    match open.last_mut() {
        Some((_, section)) => section,
        None => root,
    }
}

/// Bounds-checked cursor over a byte slice.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(ProtocolError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Reads a 1-byte length prefix and then that many UTF-8 bytes.
    pub(crate) fn key(&mut self) -> Result<String, ProtocolError> {
        let len = usize::from(self.u8()?);
        utf8(self.take(len)?)
    }

    /// Reads a 2-byte length prefix and then that many UTF-8 bytes.
    fn value(&mut self) -> Result<String, ProtocolError> {
        let len = usize::from(self.u16()?);
        utf8(self.take(len)?)
    }
}

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {e}")))
}
