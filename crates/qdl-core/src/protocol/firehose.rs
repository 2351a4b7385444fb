//! Firehose XML framing.
//!
//! Host commands are single-element documents wrapped in `<data>`. The
//! device answers with `<log value=".."/>` lines and one
//! `<response value="ACK|NAK" .../>` per command; several documents may be
//! packed into one bulk transfer.

use std::fmt;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FirehoseFrameError {
    #[error("Malformed device frame: {0}")]
    Malformed(String),
    #[error("Failed to encode <{command}>: {message}")]
    Encode { command: String, message: String },
}

/// A `<response>` element from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirehoseResponse {
    attributes: Vec<(String, String)>,
}

impl FirehoseResponse {
    pub fn new(attributes: Vec<(String, String)>) -> Self {
        Self { attributes }
    }

    /// Attribute lookup by exact name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn value(&self) -> &str {
        self.get("value").unwrap_or("")
    }

    pub fn is_ack(&self) -> bool {
        self.value().eq_ignore_ascii_case("ACK")
    }

    /// Whether the device switched into raw data mode for the coming payload.
    pub fn rawmode(&self) -> bool {
        self.get("rawmode")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    pub fn get_usize(&self, name: &str) -> Option<usize> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }
}

impl fmt::Display for FirehoseResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())?;
        for (k, v) in self.attributes.iter().filter(|(k, _)| k != "value") {
            write!(f, " {}={}", k, v)?;
        }
        Ok(())
    }
}

/// One message extracted from a device frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirehoseMessage {
    Log(String),
    Response(FirehoseResponse),
}

/// Encode a host command as a complete Firehose document.
pub fn encode_command(command: &str, attributes: &[(&str, String)]) -> Result<Vec<u8>, FirehoseFrameError> {
    let encode_err = |e: std::io::Error| FirehoseFrameError::Encode {
        command: command.to_string(),
        message: e.to_string(),
    };

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .map_err(encode_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("data")))
        .map_err(encode_err)?;

    let mut element = BytesStart::new(command);
    for (key, value) in attributes {
        element.push_attribute((*key, value.as_str()));
    }
    writer.write_event(Event::Empty(element)).map_err(encode_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("data")))
        .map_err(encode_err)?;

    Ok(writer.into_inner().into_inner())
}

/// Extract log lines and responses, in order, from one inbound frame.
pub fn parse_frames(raw: &[u8]) -> Result<Vec<FirehoseMessage>, FirehoseFrameError> {
    // Some loaders pad frames with NULs.
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let text = String::from_utf8_lossy(&raw[..end]);

    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);
    let mut messages = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| FirehoseFrameError::Malformed(e.to_string()))?;
        match event {
            Event::Start(element) | Event::Empty(element) => match element.name().as_ref() {
                b"log" => {
                    let attrs = collect_attributes(&element)?;
                    let line = attrs
                        .into_iter()
                        .find(|(k, _)| k == "value")
                        .map(|(_, v)| v)
                        .unwrap_or_default();
                    messages.push(FirehoseMessage::Log(line));
                }
                b"response" => {
                    let attrs = collect_attributes(&element)?;
                    messages.push(FirehoseMessage::Response(FirehoseResponse::new(attrs)));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(messages)
}

fn collect_attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>, FirehoseFrameError> {
    let mut attrs = Vec::new();
    for attr in element.attributes().with_checks(false) {
        let attr = attr.map_err(|e| FirehoseFrameError::Malformed(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| FirehoseFrameError::Malformed(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}
