//! Building request messages from `KEY=VALUE` arguments.
//!
//! - `key=value` sets a scalar
//! - `a.b=value` sets `b` inside section `a`, creating it if needed
//! - `key[]=value` appends to list `key`

use color_eyre::eyre::{Result, bail, eyre};
use vici::{Message, Value};

/// Build a message from `KEY=VALUE` arguments, in order.
pub fn parse_fields<S: AsRef<str>>(fields: &[S]) -> Result<Message> {
    let mut msg = Message::new();
    for field in fields {
        let field = field.as_ref();
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| eyre!("expected KEY=VALUE, got {field:?}"))?;

        let (key, append) = match key.strip_suffix("[]") {
            Some(key) => (key, true),
            None => (key, false),
        };
        let path: Vec<&str> = key.split('.').collect();
        if path.iter().any(|segment| segment.is_empty()) {
            bail!("invalid key {key:?} in {field:?}");
        }

        assign(&mut msg, &path, value, append)?;
    }
    Ok(msg)
}

fn assign(msg: &mut Message, path: &[&str], value: &str, append: bool) -> Result<()> {
    let Some((&key, rest)) = path.split_first() else {
        bail!("empty key");
    };

    if !rest.is_empty() {
        if msg.get(key).is_none() {
            msg.set(key, Message::new())?;
        }
        return match msg.get_mut(key) {
            Some(Value::Section(child)) => assign(child, rest, value, append),
            _ => bail!("{key:?} is already set and is not a section"),
        };
    }

    if !append {
        msg.set(key, value)?;
        return Ok(());
    }
    match msg.get_mut(key) {
        Some(Value::List(items)) => items.push(value.to_string()),
        Some(_) => bail!("{key:?} is already set and is not a list"),
        None => msg.set(key, vec![value])?,
    }
    Ok(())
}
