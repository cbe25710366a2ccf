use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::{ProviderError, SessionError};
use crate::model::ProviderId;
use crate::provider::{
    ProviderAdapter, ProviderEvent, ProviderRequest, ProviderResponse, ProviderResponseMeta,
    ProviderStreamHandle,
};

use super::GEMINI_PROVIDER;
use super::config::GeminiClientConfig;
use super::transport::{
    GenerateContentResponse, SseDecoder, map_gemini_frame_to_events, map_gemini_response,
    status_error,
};
use super::wire::GenerateContentRequest;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Provider adapter for the Gemini `generateContent` REST API.
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiClientConfig,
}

impl GeminiProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: GeminiClientConfig) -> Result<Self, SessionError> {
        if config.api_key.trim().is_empty() {
            return Err(SessionError::Config(
                "Gemini client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build Gemini client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::new(GeminiClientConfig::from_env()?)
    }

    async fn post(&self, url: String, req: &ProviderRequest) -> Result<reqwest::Response, ProviderError> {
        let provider_id = ProviderId::new(GEMINI_PROVIDER);
        let body = GenerateContentRequest::from_request(req);
        let mut http_req = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body);
        if let Some(timeout) = req.options.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            ProviderError::transport(provider_id.clone(), format!("Gemini request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(status_error(&provider_id, status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(GEMINI_PROVIDER)
    }

    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        debug!(call_id = %req.call_id, session_id = %req.session_id, model = %req.model, "starting Gemini content stream");
        let response = self.post(self.config.stream_url(&req.model), &req).await?;
        let metadata = ProviderResponseMeta {
            request_id: request_id(&response),
        };
        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(ProviderStreamHandle {
            stream: Box::pin(gemini_event_stream(self.id(), bytes_stream)),
            metadata,
        })
    }

    async fn generate(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        debug!(call_id = %req.call_id, session_id = %req.session_id, model = %req.model, "Gemini generate call");
        let provider_id = self.id();
        let response = self.post(self.config.generate_url(&req.model), &req).await?;
        let body: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid Gemini response: {e}"))
        })?;
        map_gemini_response(&provider_id, &body)
    }
}

fn request_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

fn gemini_event_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<ProviderEvent>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                if state.done {
                    return Ok(None);
                }

                let frames = match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => state.decoder.push_chunk(&chunk),
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("Gemini streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        state.done = true;
                        state.decoder.finish().into_iter().collect()
                    }
                };
                for frame in frames {
                    state
                        .pending
                        .extend(map_gemini_frame_to_events(&state.provider_id, &frame)?);
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::config::{GenerationParams, SessionConfig};
    use crate::content::Message;
    use crate::model::CallOptions;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn sse_stream(chunks: Vec<&'static str>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(bytes::Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[tokio::test]
    async fn event_stream_decodes_split_frames_in_order() {
        let stream = gemini_event_stream(
            ProviderId::new(GEMINI_PROVIDER),
            sse_stream(vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"The capital \"}]}}]}\n\ndata: {\"candi",
                "dates\":[{\"content\":{\"parts\":[{\"text\":\"is Paris.\"}]},\"finishReason\":\"STOP\"}]}\n\n",
            ]),
        );
        let events: Vec<_> = stream.collect().await;
        let events: Vec<ProviderEvent> = events.into_iter().map(|e| e.expect("event")).collect();
        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta {
                    text: "The capital ".into()
                },
                ProviderEvent::TextDelta {
                    text: "is Paris.".into()
                },
                ProviderEvent::Completed {
                    finish_reason: Some("STOP".into())
                },
            ]
        );
    }

    #[tokio::test]
    async fn event_stream_surfaces_mid_stream_error_object() {
        let stream = gemini_event_stream(
            ProviderId::new(GEMINI_PROVIDER),
            sse_stream(vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n\n",
                "data: {\"error\":{\"code\":500,\"message\":\"internal\"}}\n\n",
            ]),
        );
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ProviderError::Provider { .. })));
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            call_id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            model: "gemini-2.5-flash".into(),
            system_instruction: None,
            contents: vec![Message::user_text("hello")],
            generation: GenerationParams::default(),
            response_schema: None,
            response_mime_type: None,
            tools: Vec::new(),
            options: CallOptions::default(),
        }
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.expect("read");
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    return;
                }
            }
        }
    }

    /// Serves one SSE response whose second half arrives after `pause`.
    async fn paused_sse_server(first: &'static str, pause: Duration, rest: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .expect("head");
            socket.write_all(first.as_bytes()).await.expect("first");
            socket.flush().await.expect("flush");
            tokio::time::sleep(pause).await;
            socket.write_all(rest.as_bytes()).await.expect("rest");
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn slow_stream_outlives_connect_timeout_without_call_deadline() {
        let base_url = paused_sse_server(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"slow \"}]}}]}\n\n",
            Duration::from_millis(400),
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"reply\"}]},\"finishReason\":\"STOP\"}]}\n\n",
        )
        .await;
        let provider = GeminiProvider::new(
            GeminiClientConfig::new("test-key")
                .base_url(base_url)
                .timeout(Duration::from_millis(200)),
        )
        .expect("provider");

        let handle = provider.start_stream(request()).await.expect("open");
        let events: Vec<ProviderEvent> = handle
            .stream
            .map(|event| event.expect("event"))
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                ProviderEvent::TextDelta {
                    text: "slow ".into()
                },
                ProviderEvent::TextDelta {
                    text: "reply".into()
                },
                ProviderEvent::Completed {
                    finish_reason: Some("STOP".into())
                },
            ]
        );
    }

    #[test]
    fn new_rejects_blank_api_key() {
        assert!(matches!(
            GeminiProvider::new(GeminiClientConfig::new(" ")),
            Err(SessionError::Config(_))
        ));
    }

    #[tokio::test]
    async fn env_gated_smoke_chat_if_key_present() {
        if std::env::var("GEMINI_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping Gemini smoke test (GEMINI_API_KEY missing)");
            return;
        }

        let client = Client::builder()
            .provider(Arc::new(GeminiProvider::from_env().expect("provider")))
            .build()
            .expect("client");
        let mut session =
            client.session(SessionConfig::with_system_instruction("Reply with one word."));

        let mut stream = session.stream("Say ok").await.expect("start stream");
        let mut text = String::new();
        while let Some(chunk) = stream.next_chunk().await {
            text.push_str(&chunk.expect("chunk"));
        }
        drop(stream);

        assert!(!text.is_empty(), "expected some text from Gemini");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].text(), text);
    }
}
