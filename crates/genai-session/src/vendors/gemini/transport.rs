use serde::Deserialize;

use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::{ProviderEvent, ProviderResponse};

/// Data payload of one server-sent event. Event names are not used by the
/// endpoint and are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub data: String,
}

/// Incremental `text/event-stream` decoder; frames may span network chunks.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((end, delim_len)) = frame_end(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();
            frames.extend(parse_frame(&frame));
        }
        frames
    }

    /// Flushes a trailing frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_frame(&rest)
    }
}

fn frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn parse_frame(bytes: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(bytes);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        data: data.join("\n"),
    })
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize, Debug)]
struct WirePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ApiError {
    code: Option<u16>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ApiError,
}

impl GenerateContentResponse {
    fn check(&self, provider: &ProviderId) -> Result<(), ProviderError> {
        if let Some(error) = &self.error {
            return Err(api_error(provider, error));
        }
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::provider(
                provider.clone(),
                format!("prompt blocked: {reason}"),
                None,
            ));
        }
        Ok(())
    }

    /// Text of the first candidate, skipping thought parts.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| !part.thought)
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.clone())
    }
}

fn api_error(provider: &ProviderId, error: &ApiError) -> ProviderError {
    let message = match &error.status {
        Some(status) => format!("{status}: {}", error.message),
        None => error.message.clone(),
    };
    ProviderError::provider(provider.clone(), message, error.code)
}

/// Builds the error for a non-success HTTP status, preferring the endpoint's
/// own error message when the body carries one.
pub(crate) fn status_error(provider: &ProviderId, status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let mut err = api_error(provider, &envelope.error);
            if let ProviderError::Provider { status_code, .. } = &mut err {
                *status_code = Some(status);
            }
            err
        }
        Err(_) => ProviderError::provider(
            provider.clone(),
            format!("request failed with status {status}: {body}"),
            Some(status),
        ),
    }
}

pub(crate) fn map_gemini_frame_to_events(
    provider: &ProviderId,
    frame: &SseFrame,
) -> Result<Vec<ProviderEvent>, ProviderError> {
    if frame.data.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: GenerateContentResponse = serde_json::from_str(&frame.data).map_err(|e| {
        ProviderError::protocol(provider.clone(), format!("invalid SSE JSON frame: {e}"))
    })?;
    map_gemini_response_to_events(provider, &response)
}

pub(crate) fn map_gemini_response_to_events(
    provider: &ProviderId,
    response: &GenerateContentResponse,
) -> Result<Vec<ProviderEvent>, ProviderError> {
    response.check(provider)?;
    let mut events = Vec::new();
    let text = response.text();
    if !text.is_empty() {
        events.push(ProviderEvent::TextDelta { text });
    }
    if let Some(finish_reason) = response.finish_reason() {
        events.push(ProviderEvent::Completed {
            finish_reason: Some(finish_reason),
        });
    }
    Ok(events)
}

pub(crate) fn map_gemini_response(
    provider: &ProviderId,
    response: &GenerateContentResponse,
) -> Result<ProviderResponse, ProviderError> {
    response.check(provider)?;
    Ok(ProviderResponse {
        text: response.text(),
        finish_reason: response.finish_reason(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ProviderId {
        ProviderId::new("gemini")
    }

    fn parse(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).expect("response shape")
    }

    #[test]
    fn decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let first = decoder.push_chunk(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel");
        assert!(first.is_empty());
        let frames = decoder.push_chunk(b"lo\"}]}}]}\r\n\r\ndata: {}\n\n");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].data.contains("Hello"));
        assert_eq!(frames[1].data, "{}");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decoder_flushes_unterminated_trailing_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push_chunk(b": keep-alive\n\ndata: tail").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(SseFrame {
                data: "tail".into()
            })
        );
    }

    #[test]
    fn maps_text_then_completion_from_final_chunk() {
        let events = map_gemini_response_to_events(
            &provider(),
            &parse(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "Par"},
                        {"text": "is"}
                    ]},
                    "finishReason": "STOP"
                }]
            })),
        )
        .expect("events");
        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta {
                    text: "Paris".into()
                },
                ProviderEvent::Completed {
                    finish_reason: Some("STOP".into())
                },
            ]
        );
    }

    #[test]
    fn usage_only_chunk_maps_to_nothing() {
        let events = map_gemini_response_to_events(
            &provider(),
            &parse(json!({"usageMetadata": {"promptTokenCount": 3}})),
        )
        .expect("events");
        assert!(events.is_empty());
    }

    #[test]
    fn blocked_prompt_and_error_objects_are_provider_errors() {
        let blocked = map_gemini_response_to_events(
            &provider(),
            &parse(json!({"promptFeedback": {"blockReason": "SAFETY"}})),
        )
        .expect_err("blocked");
        assert!(matches!(blocked, ProviderError::Provider { ref message, .. } if message.contains("SAFETY")));

        let failed = map_gemini_response_to_events(
            &provider(),
            &parse(json!({"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}})),
        )
        .expect_err("error object");
        assert!(matches!(
            failed,
            ProviderError::Provider {
                status_code: Some(429),
                ..
            }
        ));
    }

    #[test]
    fn invalid_frame_json_is_protocol_error() {
        let err = map_gemini_frame_to_events(
            &provider(),
            &SseFrame {
                data: "{not json".into(),
            },
        )
        .expect_err("bad frame");
        assert!(matches!(err, ProviderError::Protocol { .. }));
    }

    #[test]
    fn status_error_prefers_endpoint_message() {
        let err = status_error(
            &provider(),
            403,
            r#"{"error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}}"#,
        );
        assert_eq!(err.message(), "PERMISSION_DENIED: API key not valid");
        assert!(matches!(err, ProviderError::Provider { status_code: Some(403), .. }));

        let err = status_error(&provider(), 502, "bad gateway");
        assert!(err.message().contains("502"));
    }
}
