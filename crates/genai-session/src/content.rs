use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::SessionError;

/// One typed piece of message content.
///
/// Serializes to the endpoint's part shape: `{"text": ..}`,
/// `{"inlineData": {"mimeType": .., "data": <base64>}}` or
/// `{"fileData": {"mimeType": .., "fileUri": ..}}`. The snake_case spellings
/// are accepted when deserializing.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "PartRepr", into = "PartRepr")]
pub enum ContentPart {
    /// Plain text.
    Text(String),
    /// Raw bytes tagged with a media type.
    Blob { data: Bytes, mime_type: String },
    /// A URI reference tagged with a media type.
    Link { uri: String, mime_type: String },
}

impl ContentPart {
    /// Creates a text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates an inline binary part.
    pub fn blob(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self::Blob {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Creates a URI reference part.
    pub fn link(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Link {
            uri: uri.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Returns the text payload for text parts.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the media type for blob and link parts.
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Blob { mime_type, .. } | Self::Link { mime_type, .. } => Some(mime_type),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<BlobRepr>,
    #[serde(default, alias = "file_data", skip_serializing_if = "Option::is_none")]
    file_data: Option<LinkRepr>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobRepr {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkRepr {
    #[serde(alias = "mime_type")]
    mime_type: String,
    #[serde(alias = "file_uri")]
    file_uri: String,
}

impl TryFrom<PartRepr> for ContentPart {
    type Error = String;

    fn try_from(value: PartRepr) -> Result<Self, Self::Error> {
        match (value.text, value.inline_data, value.file_data) {
            (Some(text), None, None) => Ok(Self::Text(text)),
            (None, Some(blob), None) => {
                let data = BASE64
                    .decode(blob.data.as_bytes())
                    .map_err(|e| format!("inline data is not valid base64: {e}"))?;
                Ok(Self::Blob {
                    data: Bytes::from(data),
                    mime_type: blob.mime_type,
                })
            }
            (None, None, Some(link)) => Ok(Self::Link {
                uri: link.file_uri,
                mime_type: link.mime_type,
            }),
            _ => Err("part must carry exactly one of text, inlineData or fileData".to_string()),
        }
    }
}

impl From<ContentPart> for PartRepr {
    fn from(value: ContentPart) -> Self {
        match value {
            ContentPart::Text(text) => PartRepr {
                text: Some(text),
                inline_data: None,
                file_data: None,
            },
            ContentPart::Blob { data, mime_type } => PartRepr {
                text: None,
                inline_data: Some(BlobRepr {
                    mime_type,
                    data: BASE64.encode(&data),
                }),
                file_data: None,
            },
            ContentPart::Link { uri, mime_type } => PartRepr {
                text: None,
                inline_data: None,
                file_data: Some(LinkRepr {
                    mime_type,
                    file_uri: uri,
                }),
            },
        }
    }
}

/// Author of a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Model => f.write_str("model"),
        }
    }
}

/// Canonical conversational message: a role plus ordered content parts.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self { role, parts }
    }

    /// Single-text user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    /// Single-text model message.
    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![ContentPart::text(text)])
    }

    /// Concatenates all text parts in order and ignores non-text parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// Caller-supplied content in any of the accepted shapes.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentInput {
    /// Plain text; becomes one text part.
    Text(String),
    /// A pre-built message as a key/value mapping (`role`, `parts`).
    Record(Map<String, Value>),
    /// An already typed part.
    Part(ContentPart),
    /// An already canonical message.
    Message(Message),
    /// An ordered mix of text, parts and part records.
    List(Vec<ContentInput>),
    /// Dynamic JSON input classified at normalization time.
    Value(Value),
}

impl From<&str> for ContentInput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContentInput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<ContentPart> for ContentInput {
    fn from(value: ContentPart) -> Self {
        Self::Part(value)
    }
}

impl From<Message> for ContentInput {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

impl From<Map<String, Value>> for ContentInput {
    fn from(value: Map<String, Value>) -> Self {
        Self::Record(value)
    }
}

impl From<Value> for ContentInput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl<T: Into<ContentInput>> From<Vec<T>> for ContentInput {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

/// Converts caller input into one canonical message.
///
/// Text, parts and lists default to the user role. Records and messages keep
/// their own role. Fails without building anything when any element is not a
/// supported shape, or when the result would have no parts.
pub fn normalize(input: impl Into<ContentInput>) -> Result<Message, SessionError> {
    let message = match input.into() {
        ContentInput::Text(text) => Message::user_text(text),
        ContentInput::Record(map) => message_from_record(map)?,
        ContentInput::Part(part) => Message::new(Role::User, vec![part]),
        ContentInput::Message(message) => message,
        ContentInput::List(items) => {
            let parts = items
                .into_iter()
                .map(normalize_part)
                .collect::<Result<Vec<_>, _>>()?;
            Message::new(Role::User, parts)
        }
        ContentInput::Value(value) => return normalize(classify_value(value)?),
    };
    if message.parts.is_empty() {
        return Err(SessionError::EmptyContent);
    }
    Ok(message)
}

/// Converts caller input into a context list for a stateless call.
///
/// A list made only of messages (or message records) is taken as a
/// multi-message context. Anything else becomes a single message.
pub fn normalize_contents(input: impl Into<ContentInput>) -> Result<Vec<Message>, SessionError> {
    match input.into() {
        ContentInput::Value(Value::Array(items)) => normalize_contents(ContentInput::List(
            items.into_iter().map(ContentInput::Value).collect(),
        )),
        ContentInput::List(items) if !items.is_empty() && items.iter().all(is_message_like) => {
            items.into_iter().map(normalize).collect()
        }
        other => Ok(vec![normalize(other)?]),
    }
}

fn is_message_like(item: &ContentInput) -> bool {
    match item {
        ContentInput::Message(_) => true,
        ContentInput::Record(map) => map.contains_key("parts"),
        ContentInput::Value(Value::Object(map)) => map.contains_key("parts"),
        _ => false,
    }
}

fn classify_value(value: Value) -> Result<ContentInput, SessionError> {
    match value {
        Value::String(text) => Ok(ContentInput::Text(text)),
        Value::Object(map) => Ok(ContentInput::Record(map)),
        Value::Array(items) => Ok(ContentInput::List(
            items.into_iter().map(ContentInput::Value).collect(),
        )),
        other => Err(SessionError::unsupported(json_type_name(&other))),
    }
}

fn normalize_part(item: ContentInput) -> Result<ContentPart, SessionError> {
    match item {
        ContentInput::Text(text) => Ok(ContentPart::Text(text)),
        ContentInput::Part(part) => Ok(part),
        ContentInput::Record(map) => part_from_record(map),
        ContentInput::Message(_) => Err(SessionError::unsupported("message")),
        ContentInput::List(_) => Err(SessionError::unsupported("list")),
        ContentInput::Value(Value::String(text)) => Ok(ContentPart::Text(text)),
        ContentInput::Value(Value::Object(map)) => part_from_record(map),
        ContentInput::Value(other) => Err(SessionError::unsupported(json_type_name(&other))),
    }
}

fn part_from_record(map: Map<String, Value>) -> Result<ContentPart, SessionError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| {
        debug!(error = %e, "record is not a content part");
        SessionError::unsupported("record")
    })
}

fn message_from_record(map: Map<String, Value>) -> Result<Message, SessionError> {
    serde_json::from_value(Value::Object(map)).map_err(|e| {
        debug!(error = %e, "record is not a message");
        SessionError::unsupported("record")
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "record",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_becomes_single_user_text_part() {
        let message = normalize("capital of France").expect("normalize");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.parts, vec![ContentPart::text("capital of France")]);
    }

    #[test]
    fn typed_part_becomes_single_part_message() {
        let message =
            normalize(ContentPart::link("gs://bucket/cat.png", "image/png")).expect("normalize");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.parts[0].mime_type(), Some("image/png"));
    }

    #[test]
    fn mixed_list_keeps_order_and_variants() {
        let png = Bytes::from_static(&[0x89, b'P', b'N', b'G']);
        let message = normalize(vec![
            ContentInput::Part(ContentPart::text("describe")),
            ContentInput::Part(ContentPart::blob(png.clone(), "image/png")),
        ])
        .expect("normalize");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.parts.len(), 2);
        assert_eq!(message.parts[0].as_text(), Some("describe"));
        assert_eq!(
            message.parts[1],
            ContentPart::Blob {
                data: png,
                mime_type: "image/png".into()
            }
        );
    }

    #[test]
    fn record_passes_through_with_its_role() {
        let record = json!({"role": "model", "parts": [{"text": "earlier answer"}]});
        let message = normalize(record).expect("normalize");
        assert_eq!(message, Message::model_text("earlier answer"));
    }

    #[test]
    fn record_without_role_defaults_to_user() {
        let record = json!({"parts": [{"file_data": {"mime_type": "text/plain", "file_uri": "gs://b/a.txt"}}]});
        let message = normalize(record).expect("normalize");
        assert_eq!(message.role, Role::User);
        assert_eq!(
            message.parts,
            vec![ContentPart::link("gs://b/a.txt", "text/plain")]
        );
    }

    #[test]
    fn dynamic_list_mixes_strings_and_part_records() {
        let input = json!(["look at this", {"inlineData": {"mimeType": "image/png", "data": "AQID"}}]);
        let message = normalize(input).expect("normalize");
        assert_eq!(message.parts[0].as_text(), Some("look at this"));
        assert_eq!(message.parts[1], ContentPart::blob(vec![1u8, 2, 3], "image/png"));
    }

    #[test]
    fn unsupported_scalar_reports_runtime_type() {
        let err = normalize(json!(42)).expect_err("number is unsupported");
        assert_eq!(
            err,
            SessionError::UnsupportedContentType {
                type_name: "number".into()
            }
        );
    }

    #[test]
    fn unsupported_list_element_fails_whole_message() {
        let err = normalize(json!(["ok", true])).expect_err("bool is unsupported");
        assert!(matches!(err, SessionError::UnsupportedContentType { type_name } if type_name == "boolean"));

        let err = normalize(json!(["ok", ["nested"]])).expect_err("nested list is unsupported");
        assert!(matches!(err, SessionError::UnsupportedContentType { type_name } if type_name == "list"));
    }

    #[test]
    fn record_that_is_not_a_part_is_unsupported() {
        let err = normalize(json!(["ok", {"unknown": 1}])).expect_err("bad record");
        assert!(matches!(err, SessionError::UnsupportedContentType { type_name } if type_name == "record"));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert_eq!(
            normalize(Vec::<ContentInput>::new()),
            Err(SessionError::EmptyContent)
        );
        assert_eq!(
            normalize(json!({"role": "user", "parts": []})),
            Err(SessionError::EmptyContent)
        );
    }

    #[test]
    fn blob_serializes_to_base64_inline_data() {
        let value = serde_json::to_value(ContentPart::blob(vec![1u8, 2, 3], "image/png"))
            .expect("serialize");
        assert_eq!(
            value,
            json!({"inlineData": {"mimeType": "image/png", "data": "AQID"}})
        );
    }

    #[test]
    fn normalize_contents_accepts_message_lists() {
        let contents = normalize_contents(vec![
            Message::user_text("hi"),
            Message::model_text("hello"),
            Message::user_text("and now?"),
        ])
        .expect("contents");
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role, Role::Model);

        let single = normalize_contents(vec!["one", "two"]).expect("contents");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].parts.len(), 2);
    }

    #[test]
    fn message_text_skips_non_text_parts() {
        let message = Message::new(
            Role::Model,
            vec![
                ContentPart::text("a"),
                ContentPart::blob(vec![0u8], "application/octet-stream"),
                ContentPart::text("b"),
            ],
        );
        assert_eq!(message.text(), "ab");
    }
}
