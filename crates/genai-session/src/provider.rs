use std::pin::Pin;

use futures::StreamExt as _;

use crate::config::{FunctionDeclaration, GenerationParams};
use crate::content::Message;
use crate::errors::ProviderError;
use crate::model::{CallOptions, ProviderId};

/// Everything an adapter needs to issue one remote call.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    pub call_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub model: String,
    pub system_instruction: Option<String>,
    /// Ordered conversation context, oldest first.
    pub contents: Vec<Message>,
    pub generation: GenerationParams,
    /// Rendered structured-output schema, when the session has a contract.
    pub response_schema: Option<serde_json::Value>,
    pub response_mime_type: Option<String>,
    pub tools: Vec<FunctionDeclaration>,
    pub options: CallOptions,
}

/// Events produced by an adapter stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Incremental text in arrival order.
    TextDelta { text: String },
    /// The endpoint reported the end of the response.
    Completed { finish_reason: Option<String> },
}

/// Response metadata captured when the stream was opened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderResponseMeta {
    pub request_id: Option<String>,
}

pub type ProviderEventStream =
    Pin<Box<dyn futures::Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static>>;

/// An opened remote stream.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub metadata: ProviderResponseMeta,
}

/// A complete, non-streamed response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    pub text: String,
    pub finish_reason: Option<String>,
}

/// Seam between sessions and a hosted model endpoint.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Opens one streaming call.
    async fn start_stream(
        &self,
        req: ProviderRequest,
    ) -> Result<ProviderStreamHandle, ProviderError>;

    /// Issues one call and returns the complete response.
    ///
    /// The default drains `start_stream`.
    async fn generate(&self, req: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut handle = self.start_stream(req).await?;
        let mut response = ProviderResponse::default();
        while let Some(event) = handle.stream.next().await {
            match event? {
                ProviderEvent::TextDelta { text } => response.text.push_str(&text),
                ProviderEvent::Completed { finish_reason } => {
                    response.finish_reason = finish_reason;
                    break;
                }
            }
        }
        Ok(response)
    }
}
