//! Conversational session layer over hosted generative-AI endpoints.
//!
//! A [`Client`] hands out two kinds of sessions:
//!
//! - [`Session`]: request/response calls whose output arrives as a stream of
//!   text chunks. Chat calls record each user/model exchange in the session
//!   history; stateless calls take their whole context from the caller.
//!   When the config carries a [`SchemaContract`] the final text can be
//!   validated into a [`Record`].
//! - [`LiveSession`]: a bidirectional realtime channel with an explicit
//!   connection state machine.
//!
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Streaming chat (Gemini)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use genai_session::prelude::*;
//! use genai_session::vendors::gemini::GeminiProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SessionError> {
//! let client = Client::builder()
//!     .provider(Arc::new(GeminiProvider::from_env()?))
//!     .build()?;
//!
//! let mut session = client.session(SessionConfig::with_system_instruction(
//!     "You are a helpful assistant",
//! ));
//! let mut stream = session.stream("Hi").await?;
//! while let Some(chunk) = stream.next_chunk().await {
//!     print!("{}", chunk?);
//! }
//! drop(stream);
//! assert_eq!(session.history().len(), 2);
//! # Ok(())
//! # }
//! ```

/// Client entry point and builder.
pub mod client;
/// Session configuration and generation parameters.
pub mod config;
/// Content parts, messages and input normalization.
pub mod content;
/// Public error types.
pub mod errors;
/// Live session state machine and channel contracts.
pub mod live;
/// Provider identifiers and per-call options.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts used by vendor integrations.
pub mod provider;
/// Structured-output contracts and validation.
pub mod schema;
/// Request/response sessions.
pub mod session;
/// Streaming response cursor and cancellation handle.
pub mod stream;
/// Append-only conversation history.
pub mod transcript;
/// Vendor-specific integrations.
pub mod vendors;

pub use client::{Client, ClientBuilder};
pub use config::{
    DEFAULT_MODEL, FunctionDeclaration, GenerationParams, ResponseModality, SessionConfig,
    SessionConfigBuilder,
};
pub use content::{ContentInput, ContentPart, Message, Role, normalize, normalize_contents};
pub use errors::{ProviderError, SessionError};
pub use live::{
    FunctionCall, FunctionResponse, LiveClientMessage, LiveConnector, LiveEvents, LiveServerEvent,
    LiveSession, LiveSetup, LiveState, LiveTransport, MediaChunk, RealtimeInput, ServerContent,
};
pub use model::{CallOptions, ProviderId};
pub use provider::{
    ProviderAdapter, ProviderEvent, ProviderEventStream, ProviderRequest, ProviderResponse,
    ProviderResponseMeta, ProviderStreamHandle,
};
pub use schema::{DefectKind, FieldDefect, FieldSpec, FieldType, Record, SchemaContract, validate};
pub use session::{FinalOutput, Session};
pub use stream::{AbortHandle, ResponseStream, StreamOutcome};
pub use transcript::Transcript;
