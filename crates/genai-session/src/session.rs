use std::sync::Arc;

use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::content::{ContentInput, Message, Role, normalize, normalize_contents};
use crate::errors::SessionError;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::schema::Record;
use crate::stream::ResponseStream;
use crate::transcript::Transcript;

/// Final output of a call after structured-output handling.
#[derive(Clone, Debug, PartialEq)]
pub enum FinalOutput {
    /// Raw text; the session has no response contract.
    Text(String),
    /// Text validated against the session's response contract.
    Record(Record),
}

impl FinalOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Text(_) => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Text(_) => None,
        }
    }
}

/// A conversation bound to one provider and one immutable config.
///
/// Each streaming call mutably borrows the session, so at most one call is
/// in flight per session.
pub struct Session {
    provider: Arc<dyn ProviderAdapter>,
    session_id: uuid::Uuid,
    config: SessionConfig,
    transcript: Transcript,
}

impl Session {
    pub(crate) fn new(provider: Arc<dyn ProviderAdapter>, config: SessionConfig) -> Self {
        let session = Self {
            provider,
            session_id: uuid::Uuid::new_v4(),
            config,
            transcript: Transcript::new(),
        };
        debug!(
            session_id = %session.session_id,
            provider = %session.provider.id(),
            model = session.config.model(),
            "session created"
        );
        session
    }

    pub fn id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Messages exchanged so far, oldest first.
    pub fn history(&self) -> &[Message] {
        self.transcript.all()
    }

    /// Replaces the conversation history.
    pub fn reset_history(&mut self, messages: Vec<Message>) {
        debug!(session_id = %self.session_id, len = messages.len(), "history reset");
        self.transcript.reset(messages);
    }

    /// Starts a chat-mode call.
    ///
    /// `input` is normalized into a user message and appended to the history
    /// before the request goes out; the full history is sent as context. The
    /// model message is appended only when the returned stream completes.
    pub async fn stream(
        &mut self,
        input: impl Into<ContentInput>,
    ) -> Result<ResponseStream<'_>, SessionError> {
        let message = normalize(input)?;
        self.transcript.append(message);
        let request = self.request(self.transcript.snapshot());
        self.open(request, true).await
    }

    /// Starts a stateless call over caller-supplied contents.
    ///
    /// The history is neither read nor written.
    pub async fn stream_stateless(
        &mut self,
        contents: impl Into<ContentInput>,
    ) -> Result<ResponseStream<'_>, SessionError> {
        let contents = normalize_contents(contents)?;
        let request = self.request(contents);
        self.open(request, false).await
    }

    /// Chat-mode call that waits for the complete response text.
    pub async fn generate(&mut self, input: impl Into<ContentInput>) -> Result<String, SessionError> {
        let outcome = self.stream(input).await?.finish().await?;
        Ok(outcome.text)
    }

    /// Stateless call that waits for the complete response text.
    pub async fn generate_stateless(
        &mut self,
        contents: impl Into<ContentInput>,
    ) -> Result<String, SessionError> {
        let contents = normalize_contents(contents)?;
        let request = self.request(contents);
        let call_id = request.call_id;
        let timeout = request.options.timeout;
        let call = self.provider.generate(request);
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                SessionError::Transport(format!("call did not complete within {limit:?}"))
            })??,
            None => call.await?,
        };
        info!(
            session_id = %self.session_id,
            %call_id,
            len = response.text.len(),
            finish_reason = ?response.finish_reason,
            "stateless call completed"
        );
        Ok(response.text)
    }

    /// Applies the response contract to the latest model message.
    pub fn structured_output(&self) -> Result<FinalOutput, SessionError> {
        let last = self
            .transcript
            .all()
            .iter()
            .rev()
            .find(|message| message.role == Role::Model)
            .ok_or_else(|| SessionError::Validation("no model response in history".into()))?;
        self.parse_output(&last.text())
    }

    /// Applies the response contract to `text`.
    ///
    /// Without a contract the text is returned unchanged.
    pub fn parse_output(&self, text: &str) -> Result<FinalOutput, SessionError> {
        match self.config.response_schema() {
            Some(contract) => contract.validate(text).map(FinalOutput::Record),
            None => Ok(FinalOutput::Text(text.to_string())),
        }
    }

    fn request(&self, contents: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            call_id: uuid::Uuid::new_v4(),
            session_id: self.session_id,
            model: self.config.model().to_string(),
            system_instruction: self.config.system_instruction().map(str::to_string),
            contents,
            generation: self.config.generation().clone(),
            response_schema: self
                .config
                .response_schema()
                .map(|contract| contract.to_response_schema()),
            response_mime_type: self.config.response_mime_type().map(str::to_string),
            tools: self.config.tools().to_vec(),
            options: self.config.call_options().clone(),
        }
    }

    async fn open(
        &mut self,
        request: ProviderRequest,
        chat: bool,
    ) -> Result<ResponseStream<'_>, SessionError> {
        let call_id = request.call_id;
        let timeout = request.options.timeout;
        let deadline = timeout.map(|limit| tokio::time::Instant::now() + limit);
        debug!(
            session_id = %self.session_id,
            %call_id,
            provider = %self.provider.id(),
            model = %request.model,
            context_len = request.contents.len(),
            chat,
            "starting streaming call"
        );

        let start = self.provider.start_stream(request);
        let handle = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, start)
                .await
                .map_err(|_| {
                    SessionError::Transport("call deadline elapsed while opening stream".into())
                })??,
            None => start.await?,
        };
        if let Some(request_id) = &handle.metadata.request_id {
            debug!(%call_id, request_id, "stream opened");
        }

        let history = if chat { Some(&mut self.transcript) } else { None };
        Ok(ResponseStream::new(
            call_id,
            self.session_id,
            handle.stream,
            history,
            deadline,
        ))
    }
}
