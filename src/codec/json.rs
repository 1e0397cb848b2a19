//! JSON rendering of replies and messages.

use serde_json::{json, Map, Value};

use crate::backend::{Message, Reply, Topic};

fn text(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Map a reply to JSON. Status replies become `[true, "OK"]` and error
/// replies `[false, "message"]`.
pub fn reply_to_json(reply: &Reply) -> Value {
    match reply {
        Reply::Nil => Value::Null,
        Reply::Integer(n) => json!(n),
        Reply::Double(d) => json!(d),
        Reply::Boolean(b) => json!(b),
        Reply::Status(status) => json!([true, status]),
        Reply::Error(message) => json!([false, message]),
        Reply::Bulk(data) => text(data),
        Reply::Array(items) => Value::Array(items.iter().map(reply_to_json).collect()),
        Reply::Map(pairs) => {
            let mut object = Map::new();
            for (key, value) in pairs {
                let key = match key {
                    Reply::Bulk(data) => String::from_utf8_lossy(data).into_owned(),
                    Reply::Status(s) | Reply::Error(s) => s.clone(),
                    other => reply_to_json(other).to_string(),
                };
                object.insert(key, reply_to_json(value));
            }
            Value::Object(object)
        }
    }
}

/// `{"CMD": value}`.
pub fn wrap(command: &str, value: Value) -> Value {
    let mut object = Map::new();
    object.insert(command.to_string(), value);
    Value::Object(object)
}

/// `["message", channel, payload]` or `["pmessage", pattern, channel, payload]`.
pub fn message_to_json(message: &Message) -> Value {
    match &message.topic {
        Topic::Channel(_) => json!(["message", message.channel, text(&message.payload)]),
        Topic::Pattern(pattern) => {
            json!(["pmessage", pattern, message.channel, text(&message.payload)])
        }
    }
}
