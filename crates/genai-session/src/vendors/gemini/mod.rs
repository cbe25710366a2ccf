//! Google Gemini integration: REST streaming adapter and live websocket
//! connector.
//!
//! Both read the same [`GeminiClientConfig`], so one API key and API version
//! serve request/response sessions and live sessions alike.
mod adapter;
mod config;
mod live;
mod transport;
mod wire;

pub use adapter::GeminiProvider;
pub use config::GeminiClientConfig;
pub use live::GeminiLiveConnector;

pub(crate) const GEMINI_PROVIDER: &str = "gemini";
