//! RESP serialization for the `.raw` output format.

use bytes::{BufMut, BytesMut};

use crate::backend::{Message, Reply, Topic};

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

fn put_line(buf: &mut BytesMut, prefix: u8, line: &str) {
    buf.put_u8(prefix);
    // A CR or LF would end the line early.
    for byte in line.bytes() {
        buf.put_u8(if byte == b'\r' || byte == b'\n' { b' ' } else { byte });
    }
    buf.put_slice(b"\r\n");
}

/// Append the RESP encoding of `reply` to `buf`.
pub fn write_reply(buf: &mut BytesMut, reply: &Reply) {
    match reply {
        Reply::Nil => buf.put_slice(b"$-1\r\n"),
        Reply::Integer(n) => put_line(buf, b':', &n.to_string()),
        Reply::Double(d) => put_bulk(buf, d.to_string().as_bytes()),
        Reply::Boolean(b) => put_line(buf, b':', if *b { "1" } else { "0" }),
        Reply::Status(status) => put_line(buf, b'+', status),
        Reply::Error(message) => put_line(buf, b'-', message),
        Reply::Bulk(data) => put_bulk(buf, data),
        Reply::Array(items) => {
            put_line(buf, b'*', &items.len().to_string());
            for item in items {
                write_reply(buf, item);
            }
        }
        Reply::Map(pairs) => {
            put_line(buf, b'*', &(pairs.len() * 2).to_string());
            for (key, value) in pairs {
                write_reply(buf, key);
                write_reply(buf, value);
            }
        }
    }
}

/// Append an error line.
pub fn write_error(buf: &mut BytesMut, message: &str) {
    put_line(buf, b'-', message);
}

/// Append a published message in the shape Redis itself pushes it.
pub fn write_message(buf: &mut BytesMut, message: &Message) {
    match &message.topic {
        Topic::Channel(_) => {
            buf.put_slice(b"*3\r\n");
            put_bulk(buf, b"message");
        }
        Topic::Pattern(pattern) => {
            buf.put_slice(b"*4\r\n");
            put_bulk(buf, b"pmessage");
            put_bulk(buf, pattern.as_bytes());
        }
    }
    put_bulk(buf, message.channel.as_bytes());
    put_bulk(buf, &message.payload);
}
