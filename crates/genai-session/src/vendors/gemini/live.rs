use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt as _, StreamExt as _};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, warn};

use crate::content::{ContentPart, Message, Role};
use crate::errors::ProviderError;
use crate::live::{
    FunctionCall, FunctionResponse, LiveClientMessage, LiveConnector, LiveServerEvent, LiveSetup,
    LiveTransport, MediaChunk, RealtimeInput, ServerContent,
};
use crate::model::ProviderId;

use super::GEMINI_PROVIDER;
use super::config::{GeminiClientConfig, model_path};
use super::wire::{GenerationConfig, SystemInstruction, Tool};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Gemini `BidiGenerateContent` websocket sessions.
pub struct GeminiLiveConnector {
    config: GeminiClientConfig,
}

impl GeminiLiveConnector {
    pub fn new(config: GeminiClientConfig) -> Self {
        Self { config }
    }

    /// Creates a connector using `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, crate::errors::SessionError> {
        Ok(Self::new(GeminiClientConfig::from_env()?))
    }
}

#[async_trait::async_trait]
impl LiveConnector for GeminiLiveConnector {
    fn id(&self) -> ProviderId {
        ProviderId::new(GEMINI_PROVIDER)
    }

    async fn connect(&self, setup: LiveSetup) -> Result<Box<dyn LiveTransport>, ProviderError> {
        let provider_id = self.id();
        let handshake = async {
            let (mut ws, _) = connect_async(self.config.live_endpoint())
                .await
                .map_err(|e| {
                    ProviderError::transport(
                        provider_id.clone(),
                        format!("Gemini live connect failed: {e}"),
                    )
                })?;
            debug!(model = %setup.model, "Gemini live socket open; sending setup");
            let payload = serde_json::to_string(&SetupMessage::new(&setup)).map_err(|e| {
                ProviderError::protocol(provider_id.clone(), format!("invalid setup: {e}"))
            })?;
            ws.send(WsMessage::Text(payload.into()))
                .await
                .map_err(|e| ws_error(&provider_id, e))?;

            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        if setup_complete(&provider_id, text.as_bytes())? {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        if setup_complete(&provider_id, &data)? {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Err(ProviderError::provider(
                            provider_id.clone(),
                            format!("Gemini live setup rejected: {frame:?}"),
                            None,
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ws_error(&provider_id, e)),
                    None => {
                        return Err(ProviderError::transport(
                            provider_id.clone(),
                            "Gemini live socket closed during setup",
                        ));
                    }
                }
            }
            Ok::<_, ProviderError>(ws)
        };

        let ws = tokio::time::timeout(self.config.timeout, handshake)
            .await
            .map_err(|_| {
                ProviderError::transport(
                    provider_id.clone(),
                    format!("Gemini live setup timed out after {:?}", self.config.timeout),
                )
            })??;
        info!(model = %setup.model, "Gemini live setup complete");
        Ok(Box::new(GeminiLiveTransport { provider_id, ws }))
    }
}

struct GeminiLiveTransport {
    provider_id: ProviderId,
    ws: WsStream,
}

#[async_trait::async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn send(&mut self, message: LiveClientMessage) -> Result<(), ProviderError> {
        let payload = serde_json::to_string(&ClientMessage::from(&message)).map_err(|e| {
            ProviderError::protocol(self.provider_id.clone(), format!("invalid message: {e}"))
        })?;
        self.ws
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| ws_error(&self.provider_id, e))
    }

    async fn recv(&mut self) -> Option<Result<LiveServerEvent, ProviderError>> {
        loop {
            let bytes = match self.ws.next().await? {
                Ok(WsMessage::Text(text)) => text.as_bytes().to_vec(),
                Ok(WsMessage::Binary(data)) => data.to_vec(),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "Gemini live socket closed by server");
                    return None;
                }
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => return Some(Err(ws_error(&self.provider_id, e))),
            };
            return Some(parse_server_message(&self.provider_id, &bytes));
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        match self.ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Gemini live close failed");
                Err(ws_error(&self.provider_id, e))
            }
        }
    }
}

fn ws_error(provider_id: &ProviderId, err: tungstenite::Error) -> ProviderError {
    ProviderError::transport(provider_id.clone(), format!("Gemini live socket error: {err}"))
}

fn setup_complete(provider_id: &ProviderId, bytes: &[u8]) -> Result<bool, ProviderError> {
    let message: ServerMessage = serde_json::from_slice(bytes).map_err(|e| {
        ProviderError::protocol(provider_id.clone(), format!("invalid setup reply: {e}"))
    })?;
    Ok(message.setup_complete.is_some())
}

// Client -> server

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SetupMessage<'a> {
    setup: Setup<'a>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool<'a>>,
}

impl<'a> SetupMessage<'a> {
    fn new(setup: &'a LiveSetup) -> Self {
        Self {
            setup: Setup {
                model: model_path(&setup.model),
                generation_config: GenerationConfig::new(&setup.generation, None, None),
                system_instruction: SystemInstruction::new(setup.system_instruction.as_deref()),
                tools: Tool::from_declarations(&setup.tools),
            },
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
enum ClientMessage<'a> {
    ClientContent(ClientContent<'a>),
    RealtimeInput(RealtimeInputWire<'a>),
    ToolResponse(ToolResponse<'a>),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: &'a [Message],
    turn_complete: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputWire<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_chunks: Vec<Blob<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<Blob<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<Blob<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity_start: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activity_end: Option<Empty>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    audio_stream_end: bool,
}

#[derive(Serialize, Debug)]
struct Empty {}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Blob<'a> {
    mime_type: &'a str,
    data: String,
}

impl<'a> From<&'a MediaChunk> for Blob<'a> {
    fn from(chunk: &'a MediaChunk) -> Self {
        Self {
            mime_type: &chunk.mime_type,
            data: BASE64.encode(&chunk.data),
        }
    }
}

impl<'a> From<&'a RealtimeInput> for RealtimeInputWire<'a> {
    fn from(input: &'a RealtimeInput) -> Self {
        Self {
            media_chunks: input.media.iter().map(Blob::from).collect(),
            audio: input.audio.as_ref().map(Blob::from),
            video: input.video.as_ref().map(Blob::from),
            text: input.text.as_deref(),
            activity_start: input.activity_start.then_some(Empty {}),
            activity_end: input.activity_end.then_some(Empty {}),
            audio_stream_end: input.audio_stream_end,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ToolResponse<'a> {
    function_responses: Vec<FunctionResponseWire<'a>>,
}

#[derive(Serialize, Debug)]
struct FunctionResponseWire<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    name: &'a str,
    response: &'a serde_json::Value,
}

impl<'a> From<&'a FunctionResponse> for FunctionResponseWire<'a> {
    fn from(value: &'a FunctionResponse) -> Self {
        Self {
            id: value.id.as_deref(),
            name: &value.name,
            response: &value.response,
        }
    }
}

impl<'a> From<&'a LiveClientMessage> for ClientMessage<'a> {
    fn from(message: &'a LiveClientMessage) -> Self {
        match message {
            LiveClientMessage::ClientContent {
                turns,
                turn_complete,
            } => ClientMessage::ClientContent(ClientContent {
                turns,
                turn_complete: *turn_complete,
            }),
            LiveClientMessage::RealtimeInput(input) => ClientMessage::RealtimeInput(input.into()),
            LiveClientMessage::ToolResponse { function_responses } => {
                ClientMessage::ToolResponse(ToolResponse {
                    function_responses: function_responses.iter().map(Into::into).collect(),
                })
            }
        }
    }
}

// Server -> client

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContentWire>,
    tool_call: Option<ToolCallWire>,
    tool_call_cancellation: Option<ToolCallCancellationWire>,
    go_away: Option<GoAwayWire>,
    usage_metadata: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ServerContentWire {
    model_turn: Option<TurnWire>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    generation_complete: bool,
    input_transcription: Option<TranscriptionWire>,
    output_transcription: Option<TranscriptionWire>,
}

#[derive(Deserialize, Debug)]
struct TurnWire {
    role: Option<Role>,
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct TranscriptionWire {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ToolCallWire {
    #[serde(default)]
    function_calls: Vec<FunctionCallWire>,
}

#[derive(Deserialize, Debug)]
struct FunctionCallWire {
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct ToolCallCancellationWire {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GoAwayWire {
    time_left: Option<String>,
}

fn parse_server_message(
    provider_id: &ProviderId,
    bytes: &[u8],
) -> Result<LiveServerEvent, ProviderError> {
    let raw: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
        ProviderError::protocol(provider_id.clone(), format!("invalid live message: {e}"))
    })?;
    let message: ServerMessage = serde_json::from_value(raw.clone()).map_err(|e| {
        ProviderError::protocol(provider_id.clone(), format!("unexpected live message: {e}"))
    })?;

    if let Some(content) = message.server_content {
        return Ok(LiveServerEvent::Content(ServerContent {
            model_turn: content.model_turn.map(|turn| {
                // Audio and function parts without a typed mapping are skipped.
                let parts = turn
                    .parts
                    .into_iter()
                    .filter_map(|part| serde_json::from_value::<ContentPart>(part).ok())
                    .collect();
                Message::new(turn.role.unwrap_or(Role::Model), parts)
            }),
            turn_complete: content.turn_complete,
            interrupted: content.interrupted,
            generation_complete: content.generation_complete,
            input_transcription: content.input_transcription.map(|t| t.text),
            output_transcription: content.output_transcription.map(|t| t.text),
        }));
    }
    if let Some(tool_call) = message.tool_call {
        return Ok(LiveServerEvent::ToolCall {
            function_calls: tool_call
                .function_calls
                .into_iter()
                .map(|call| FunctionCall {
                    id: call.id,
                    name: call.name,
                    args: call.args,
                })
                .collect(),
        });
    }
    if let Some(cancellation) = message.tool_call_cancellation {
        return Ok(LiveServerEvent::ToolCallCancellation {
            ids: cancellation.ids,
        });
    }
    if let Some(go_away) = message.go_away {
        return Ok(LiveServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    if let Some(usage) = message.usage_metadata {
        return Ok(LiveServerEvent::UsageMetadata(usage));
    }
    if message.setup_complete.is_some() {
        debug!("ignoring repeated setupComplete");
    }
    Ok(LiveServerEvent::Other(raw))
}
