//! Envelope codec.
//!
//! An envelope is a header object followed by any number of items, each an
//! item header plus a payload:
//!
//! ```text
//! {"event_id":"9ec79c33ec9942ab8353589fcb2e04dc"}\n
//! {"type":"attachment","length":10,"filename":"hello.txt"}\n
//! \xef\xbb\xbfHello\r\n\n
//! {"type":"event"}\n
//! {"message":"hello world"}\n
//! ```
//!
//! Raw payloads are always written with a `length`, so they may contain
//! newlines. JSON payloads are written without one and end at the next
//! newline.
use crate::dsn::Dsn;
use crate::export::TransactionEvent;
use crate::trace::SdkInfo;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use thiserror::Error;
use traceline::trace::TraceError;

/// Errors reading or writing an [`Envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The input ended inside an item.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// The input is empty.
    #[error("missing envelope header")]
    MissingHeader,
    /// A header or a length-delimited payload is not followed by a newline.
    #[error("missing newline after header or payload")]
    MissingNewline,
    /// The envelope header is not a JSON object.
    #[error("invalid envelope header")]
    InvalidHeader(#[source] serde_json::Error),
    /// An item header is not valid.
    #[error("invalid item header")]
    InvalidItemHeader(#[source] serde_json::Error),
    /// A JSON payload could not be parsed or produced.
    #[error("invalid item payload")]
    InvalidPayload(#[source] serde_json::Error),
    /// Writing a header failed.
    #[error("failed to write header")]
    HeaderIoFailed(#[source] serde_json::Error),
    /// Writing a payload failed.
    #[error("failed to write payload")]
    PayloadIoFailed(#[source] io::Error),
}

impl From<EnvelopeError> for TraceError {
    fn from(err: EnvelopeError) -> Self {
        TraceError::MalformedEnvelope(Box::new(err))
    }
}

/// The type of an envelope item.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemType {
    /// Error or message event.
    Event,
    /// Finished transaction.
    Transaction,
    /// File attachment.
    Attachment,
    /// Single session update.
    Session,
    /// Aggregated sessions.
    Sessions,
    /// Client report of discarded data.
    ClientReport,
    /// User feedback.
    UserReport,
    /// Profile.
    Profile,
    /// Replay event.
    ReplayEvent,
    /// Replay recording.
    ReplayRecording,
    /// Cron check-in.
    CheckIn,
    /// Standalone span.
    Span,
    /// Log record.
    Log,
    /// A type this version does not know. Kept as is.
    Unknown(String),
}

impl ItemType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            ItemType::Event => "event",
            ItemType::Transaction => "transaction",
            ItemType::Attachment => "attachment",
            ItemType::Session => "session",
            ItemType::Sessions => "sessions",
            ItemType::ClientReport => "client_report",
            ItemType::UserReport => "user_report",
            ItemType::Profile => "profile",
            ItemType::ReplayEvent => "replay_event",
            ItemType::ReplayRecording => "replay_recording",
            ItemType::CheckIn => "check_in",
            ItemType::Span => "span",
            ItemType::Log => "log",
            ItemType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "event" => ItemType::Event,
            "transaction" => ItemType::Transaction,
            "attachment" => ItemType::Attachment,
            "session" => ItemType::Session,
            "sessions" => ItemType::Sessions,
            "client_report" => ItemType::ClientReport,
            "user_report" => ItemType::UserReport,
            "profile" => ItemType::Profile,
            "replay_event" => ItemType::ReplayEvent,
            "replay_recording" => ItemType::ReplayRecording,
            "check_in" => ItemType::CheckIn,
            "span" => ItemType::Span,
            "log" => ItemType::Log,
            other => ItemType::Unknown(other.to_string()),
        })
    }
}

impl Serialize for ItemType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ItemType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Cow::<'de, str>::deserialize(deserializer)?;
        Ok(ItemType::from_str(&s).unwrap_or_else(|never| match never {}))
    }
}

/// Headers of one item. `length` is managed by the codec and never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemHeaders {
    /// The type of the item.
    pub ty: ItemType,
    /// Any other header, e.g. `filename` or `content_type`.
    pub other: BTreeMap<String, Value>,
}

#[derive(Serialize)]
struct WriteItemHeaders<'a> {
    #[serde(rename = "type")]
    ty: &'a ItemType,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<usize>,
    #[serde(flatten)]
    other: &'a BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct ReadItemHeaders {
    #[serde(rename = "type")]
    ty: ItemType,
    #[serde(default)]
    length: Option<u64>,
    #[serde(flatten)]
    other: BTreeMap<String, Value>,
}

/// Payload of one item.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemPayload {
    /// A JSON document, written on a single line.
    Json(Value),
    /// Opaque bytes, written with an explicit length.
    Raw(Bytes),
}

/// One envelope item.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    headers: ItemHeaders,
    payload: ItemPayload,
}

impl Item {
    /// An item carrying a JSON document.
    pub fn json(ty: ItemType, payload: Value) -> Self {
        Item {
            headers: ItemHeaders {
                ty,
                other: BTreeMap::new(),
            },
            payload: ItemPayload::Json(payload),
        }
    }

    /// An item carrying raw bytes.
    pub fn raw(ty: ItemType, payload: impl Into<Bytes>) -> Self {
        Item {
            headers: ItemHeaders {
                ty,
                other: BTreeMap::new(),
            },
            payload: ItemPayload::Raw(payload.into()),
        }
    }

    /// An attachment item with a file name.
    pub fn attachment(filename: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Item::raw(ItemType::Attachment, payload).with_header("filename", filename.into())
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Sets a header. `type` and `length` are reserved and ignored here.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == "type" || key == "length" {
            return;
        }
        self.headers.other.insert(key, value.into());
    }

    /// The item type.
    pub fn ty(&self) -> &ItemType {
        &self.headers.ty
    }

    /// All headers except `type` and `length`.
    pub fn headers(&self) -> &ItemHeaders {
        &self.headers
    }

    /// The header named `key`.
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.other.get(key)
    }

    /// The payload.
    pub fn payload(&self) -> &ItemPayload {
        &self.payload
    }

    /// The payload as JSON, parsing raw payloads.
    pub fn payload_json(&self) -> Result<Value, EnvelopeError> {
        match &self.payload {
            ItemPayload::Json(value) => Ok(value.clone()),
            ItemPayload::Raw(bytes) => {
                serde_json::from_slice(bytes).map_err(EnvelopeError::InvalidPayload)
            }
        }
    }

    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), EnvelopeError> {
        let length = match &self.payload {
            ItemPayload::Json(_) => None,
            ItemPayload::Raw(bytes) => Some(bytes.len()),
        };
        let headers = WriteItemHeaders {
            ty: &self.headers.ty,
            length,
            other: &self.headers.other,
        };
        serde_json::to_writer(&mut *writer, &headers).map_err(EnvelopeError::HeaderIoFailed)?;
        write(writer, b"\n")?;

        match &self.payload {
            ItemPayload::Json(value) => {
                serde_json::to_writer(&mut *writer, value).map_err(EnvelopeError::InvalidPayload)?
            }
            ItemPayload::Raw(bytes) => write(writer, bytes)?,
        }
        write(writer, b"\n")
    }

    /// Parses one item from the start of `bytes`. Returns the item and the
    /// number of bytes consumed.
    fn parse(bytes: Bytes) -> Result<(Item, usize), EnvelopeError> {
        let slice = bytes.as_ref();
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let headers: ReadItemHeaders = match stream.next() {
            None => return Err(EnvelopeError::UnexpectedEof),
            Some(Err(error)) => return Err(EnvelopeError::InvalidItemHeader(error)),
            Some(Ok(headers)) => headers,
        };

        let headers_end = stream.byte_offset();
        require_termination(slice, headers_end)?;

        // The last item may omit its trailing newline.
        let payload_start = std::cmp::min(headers_end + 1, bytes.len());
        let (payload, payload_end) = match headers.length {
            Some(len) => {
                let payload_end = usize::try_from(len)
                    .ok()
                    .and_then(|len| payload_start.checked_add(len))
                    .filter(|end| *end <= bytes.len())
                    .ok_or(EnvelopeError::UnexpectedEof)?;
                require_termination(slice, payload_end)?;
                (
                    ItemPayload::Raw(bytes.slice(payload_start..payload_end)),
                    payload_end,
                )
            }
            None => {
                let payload_end = match slice[payload_start..].iter().position(|b| *b == b'\n') {
                    Some(relative_end) => payload_start + relative_end,
                    None => bytes.len(),
                };
                let payload = &slice[payload_start..payload_end];
                let payload = if payload.is_empty() {
                    ItemPayload::Raw(Bytes::new())
                } else {
                    ItemPayload::Json(
                        serde_json::from_slice(payload).map_err(EnvelopeError::InvalidPayload)?,
                    )
                };
                (payload, payload_end)
            }
        };

        let item = Item {
            headers: ItemHeaders {
                ty: headers.ty,
                other: headers.other,
            },
            payload,
        };
        Ok((item, payload_end + 1))
    }
}

/// A header object plus an ordered list of items.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    headers: BTreeMap<String, Value>,
    items: Vec<Item>,
}

impl Envelope {
    /// An envelope without headers or items.
    pub fn new() -> Self {
        Envelope::default()
    }

    /// Wraps a finished transaction, with `event_id`, `sent_at`, `sdk`,
    /// `dsn` and the dynamic sampling context as `trace` header.
    pub fn from_transaction_event(
        event: &TransactionEvent,
        sdk: &SdkInfo,
        dsn: Option<&Dsn>,
    ) -> Result<Self, EnvelopeError> {
        let mut envelope = Envelope::new();
        envelope.set_header("event_id", event.event_id.simple().to_string());
        let sent_at: DateTime<Utc> = traceline::time::now().into();
        envelope.set_header(
            "sent_at",
            sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        envelope.set_header(
            "sdk",
            serde_json::to_value(sdk).map_err(EnvelopeError::HeaderIoFailed)?,
        );
        if let Some(dsn) = dsn {
            envelope.set_header("dsn", dsn.to_string());
        }
        if let Some(dsc) = event
            .dynamic_sampling_context
            .as_ref()
            .filter(|dsc| !dsc.is_sentry_empty())
        {
            envelope.set_header(
                "trace",
                serde_json::to_value(dsc.sentry_items()).map_err(EnvelopeError::HeaderIoFailed)?,
            );
        }

        let payload = serde_json::to_value(event).map_err(EnvelopeError::InvalidPayload)?;
        envelope.add_item(Item::json(ItemType::Transaction, payload));
        Ok(envelope)
    }

    /// All envelope headers.
    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    /// The header named `key`.
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// Sets a header.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Appends an item.
    pub fn add_item(&mut self, item: Item) {
        self.items.push(item);
    }

    /// Items in order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there are no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Writes the envelope to `writer`.
    pub fn serialize<W: Write>(&self, mut writer: W) -> Result<(), EnvelopeError> {
        serde_json::to_writer(&mut writer, &self.headers).map_err(EnvelopeError::HeaderIoFailed)?;
        write(&mut writer, b"\n")?;

        for item in &self.items {
            item.serialize(&mut writer)?;
        }
        Ok(())
    }

    /// Serializes the envelope into a buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut vec = Vec::new();
        self.serialize(&mut vec)?;
        Ok(vec)
    }

    /// Parses an envelope.
    pub fn parse_bytes(bytes: Bytes) -> Result<Self, EnvelopeError> {
        let (headers, offset) = Self::parse_headers(&bytes)?;
        let items = Self::parse_items(&bytes, offset)?;
        Ok(Envelope { headers, items })
    }

    /// Parses an envelope from a borrowed buffer.
    pub fn from_slice(slice: &[u8]) -> Result<Self, EnvelopeError> {
        Self::parse_bytes(Bytes::copy_from_slice(slice))
    }

    fn parse_headers(slice: &[u8]) -> Result<(BTreeMap<String, Value>, usize), EnvelopeError> {
        let mut stream = serde_json::Deserializer::from_slice(slice).into_iter();

        let headers = match stream.next() {
            None => return Err(EnvelopeError::MissingHeader),
            Some(Err(error)) => return Err(EnvelopeError::InvalidHeader(error)),
            Some(Ok(headers)) => headers,
        };

        // Each header is terminated by a UNIX newline.
        require_termination(slice, stream.byte_offset())?;

        Ok((headers, stream.byte_offset() + 1))
    }

    fn parse_items(bytes: &Bytes, mut offset: usize) -> Result<Vec<Item>, EnvelopeError> {
        let mut items = Vec::new();

        while offset < bytes.len() {
            let (item, item_size) = Item::parse(bytes.slice(offset..))?;
            offset += item_size;
            items.push(item);
        }

        Ok(items)
    }
}

fn write<W: Write>(writer: &mut W, buf: &[u8]) -> Result<(), EnvelopeError> {
    writer
        .write_all(buf)
        .map_err(EnvelopeError::PayloadIoFailed)
}

fn require_termination(slice: &[u8], offset: usize) -> Result<(), EnvelopeError> {
    match slice.get(offset) {
        Some(&b'\n') | None => Ok(()),
        Some(_) => Err(EnvelopeError::MissingNewline),
    }
}
