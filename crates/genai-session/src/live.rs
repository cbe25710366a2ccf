use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::{FunctionDeclaration, GenerationParams, SessionConfig};
use crate::content::{ContentInput, Message, normalize};
use crate::errors::{ProviderError, SessionError};
use crate::model::ProviderId;

/// Connection state of a [`LiveSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LiveState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LiveState::Disconnected => "disconnected",
            LiveState::Connecting => "connecting",
            LiveState::Connected => "connected",
            LiveState::Closed => "closed",
        })
    }
}

/// Session parameters sent once when the channel opens.
#[derive(Clone, Debug, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub system_instruction: Option<String>,
    pub generation: GenerationParams,
    pub tools: Vec<FunctionDeclaration>,
}

impl From<&SessionConfig> for LiveSetup {
    fn from(config: &SessionConfig) -> Self {
        Self {
            model: config.model().to_string(),
            system_instruction: config.system_instruction().map(str::to_string),
            generation: config.generation().clone(),
            tools: config.tools().to_vec(),
        }
    }
}

/// Raw media bytes with their MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaChunk {
    pub data: Bytes,
    pub mime_type: String,
}

impl MediaChunk {
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Realtime input; every field is independently optional and forwarded as is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RealtimeInput {
    pub media: Option<MediaChunk>,
    pub audio: Option<MediaChunk>,
    pub video: Option<MediaChunk>,
    pub text: Option<String>,
    pub activity_start: bool,
    pub activity_end: bool,
    pub audio_stream_end: bool,
}

impl RealtimeInput {
    pub fn media(mut self, chunk: MediaChunk) -> Self {
        self.media = Some(chunk);
        self
    }

    pub fn audio(mut self, chunk: MediaChunk) -> Self {
        self.audio = Some(chunk);
        self
    }

    pub fn video(mut self, chunk: MediaChunk) -> Self {
        self.video = Some(chunk);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn activity_start(mut self) -> Self {
        self.activity_start = true;
        self
    }

    pub fn activity_end(mut self) -> Self {
        self.activity_end = true;
        self
    }

    pub fn audio_stream_end(mut self) -> Self {
        self.audio_stream_end = true;
        self
    }
}

/// Result of a client-side function invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionResponse {
    pub id: Option<String>,
    pub name: String,
    pub response: serde_json::Value,
}

impl FunctionResponse {
    pub fn new(name: impl Into<String>, response: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            response,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A function the model asked the client to run.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    pub args: serde_json::Value,
}

/// Messages the client sends over an open channel.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveClientMessage {
    ClientContent {
        turns: Vec<Message>,
        turn_complete: bool,
    },
    RealtimeInput(RealtimeInput),
    ToolResponse {
        function_responses: Vec<FunctionResponse>,
    },
}

/// Model output carried by a server content event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerContent {
    pub model_turn: Option<Message>,
    pub turn_complete: bool,
    pub interrupted: bool,
    pub generation_complete: bool,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
}

impl ServerContent {
    /// Text of the model turn, if any.
    pub fn text(&self) -> Option<String> {
        self.model_turn.as_ref().map(Message::text)
    }
}

/// Events delivered by the server, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveServerEvent {
    Content(ServerContent),
    ToolCall { function_calls: Vec<FunctionCall> },
    ToolCallCancellation { ids: Vec<String> },
    GoAway { time_left: Option<String> },
    UsageMetadata(serde_json::Value),
    /// Server message with no typed mapping.
    Other(serde_json::Value),
}

impl LiveServerEvent {
    pub fn is_turn_complete(&self) -> bool {
        matches!(self, LiveServerEvent::Content(content) if content.turn_complete)
    }
}

/// Opens live channels.
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Opens a channel and completes the setup handshake.
    async fn connect(&self, setup: LiveSetup) -> Result<Box<dyn LiveTransport>, ProviderError>;
}

/// One open bidirectional channel.
#[async_trait::async_trait]
pub trait LiveTransport: Send {
    async fn send(&mut self, message: LiveClientMessage) -> Result<(), ProviderError>;

    /// Next server event; `None` once the remote side has closed the channel.
    async fn recv(&mut self) -> Option<Result<LiveServerEvent, ProviderError>>;

    async fn close(&mut self) -> Result<(), ProviderError>;
}

/// A bidirectional realtime session.
///
/// Transitions: `Disconnected -> Connecting -> Connected -> Closed`, with a
/// failed connect returning to `Disconnected`. `Closed` is terminal. Dropping
/// the session releases the channel.
pub struct LiveSession {
    connector: Arc<dyn LiveConnector>,
    setup: LiveSetup,
    session_id: uuid::Uuid,
    state: LiveState,
    transport: Option<Box<dyn LiveTransport>>,
}

impl LiveSession {
    pub(crate) fn new(connector: Arc<dyn LiveConnector>, setup: LiveSetup) -> Self {
        Self {
            connector,
            setup,
            session_id: uuid::Uuid::new_v4(),
            state: LiveState::Disconnected,
            transport: None,
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn state(&self) -> LiveState {
        self.state
    }

    pub fn setup(&self) -> &LiveSetup {
        &self.setup
    }

    /// Opens the channel. Only valid while disconnected.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != LiveState::Disconnected {
            return Err(SessionError::invalid_state("connect", self.state));
        }
        debug!(session_id = %self.session_id, model = %self.setup.model, "live session connecting");
        let mut attempt = ConnectAttempt::start(&mut self.state);
        match self.connector.connect(self.setup.clone()).await {
            Ok(transport) => {
                self.transport = Some(transport);
                attempt.settle(LiveState::Connected);
                info!(session_id = %self.session_id, provider = %self.connector.id(), "live session connected");
                Ok(())
            }
            Err(err) => {
                drop(attempt);
                warn!(session_id = %self.session_id, error = %err, "live connect failed");
                Err(err.into())
            }
        }
    }

    /// Sends conversational turns, connecting first when disconnected.
    pub async fn send_client_content(
        &mut self,
        turns: Vec<Message>,
        turn_complete: bool,
    ) -> Result<(), SessionError> {
        match self.state {
            LiveState::Disconnected => self.connect().await?,
            LiveState::Connected => {}
            state => return Err(SessionError::invalid_state("send client content", state)),
        }
        self.send("send client content", LiveClientMessage::ClientContent {
            turns,
            turn_complete,
        })
        .await
    }

    /// Normalizes `input` into one user turn and sends it.
    pub async fn send_user_input(
        &mut self,
        input: impl Into<ContentInput>,
        turn_complete: bool,
    ) -> Result<(), SessionError> {
        let message = normalize(input)?;
        self.send_client_content(vec![message], turn_complete).await
    }

    pub async fn send_realtime_input(&mut self, input: RealtimeInput) -> Result<(), SessionError> {
        self.send("send realtime input", LiveClientMessage::RealtimeInput(input))
            .await
    }

    pub async fn send_tool_response(
        &mut self,
        function_responses: Vec<FunctionResponse>,
    ) -> Result<(), SessionError> {
        self.send("send tool response", LiveClientMessage::ToolResponse {
            function_responses,
        })
        .await
    }

    /// Cursor over server events until the remote side closes the channel.
    pub fn receive(&mut self) -> Result<LiveEvents<'_>, SessionError> {
        self.events("receive", false)
    }

    /// Cursor over server events up to and including the next turn-complete
    /// event.
    pub fn receive_turn(&mut self) -> Result<LiveEvents<'_>, SessionError> {
        self.events("receive turn", true)
    }

    /// Closes the channel. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == LiveState::Closed {
            return Ok(());
        }
        self.state = LiveState::Closed;
        let Some(mut transport) = self.transport.take() else {
            debug!(session_id = %self.session_id, "live session closed before connecting");
            return Ok(());
        };
        let result = transport.close().await;
        info!(session_id = %self.session_id, "live session closed");
        result.map_err(SessionError::from)
    }

    fn events(
        &mut self,
        operation: &'static str,
        until_turn_complete: bool,
    ) -> Result<LiveEvents<'_>, SessionError> {
        if self.state != LiveState::Connected {
            return Err(SessionError::invalid_state(operation, self.state));
        }
        Ok(LiveEvents {
            session: self,
            until_turn_complete,
            done: false,
        })
    }

    async fn send(
        &mut self,
        operation: &'static str,
        message: LiveClientMessage,
    ) -> Result<(), SessionError> {
        let state = self.state;
        let Some(transport) = self.transport.as_mut().filter(|_| state == LiveState::Connected)
        else {
            return Err(SessionError::invalid_state(operation, state));
        };
        match transport.send(message).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if matches!(err, ProviderError::Transport { .. }) {
                    self.drop_transport("send failed");
                }
                Err(err.into())
            }
        }
    }

    fn drop_transport(&mut self, reason: &str) {
        if self.transport.take().is_some() {
            warn!(session_id = %self.session_id, reason, "live channel lost");
        }
        self.state = LiveState::Closed;
    }
}

/// Holds a session in `Connecting` for the length of a handshake. Unless
/// settled, dropping it (failure or an abandoned connect future) returns the
/// session to `Disconnected`.
struct ConnectAttempt<'a> {
    state: &'a mut LiveState,
    settled: bool,
}

impl<'a> ConnectAttempt<'a> {
    fn start(state: &'a mut LiveState) -> Self {
        *state = LiveState::Connecting;
        Self {
            state,
            settled: false,
        }
    }

    fn settle(&mut self, next: LiveState) {
        *self.state = next;
        self.settled = true;
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            *self.state = LiveState::Disconnected;
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if self.transport.take().is_some() {
            debug!(session_id = %self.session_id, "live session dropped while open; channel released");
        }
    }
}

/// Cursor over server events of a [`LiveSession`].
pub struct LiveEvents<'s> {
    session: &'s mut LiveSession,
    until_turn_complete: bool,
    done: bool,
}

impl LiveEvents<'_> {
    /// Next server event.
    ///
    /// Returns `None` after a turn completes (for [`LiveSession::receive_turn`])
    /// or once the remote side closes, which moves the session to `Closed`.
    pub async fn next_event(&mut self) -> Option<Result<LiveServerEvent, SessionError>> {
        if self.done {
            return None;
        }
        let Some(transport) = self.session.transport.as_mut() else {
            self.done = true;
            return None;
        };
        match transport.recv().await {
            Some(Ok(event)) => {
                if self.until_turn_complete && event.is_turn_complete() {
                    self.done = true;
                }
                Some(Ok(event))
            }
            Some(Err(err)) => {
                self.done = true;
                self.session.drop_transport("receive failed");
                Some(Err(err.into()))
            }
            None => {
                self.done = true;
                info!(session_id = %self.session.session_id, "live channel closed by remote");
                self.session.transport = None;
                self.session.state = LiveState::Closed;
                None
            }
        }
    }
}
