use std::time::Duration;

use crate::errors::SessionError;

pub(crate) const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub(crate) const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com";
pub(crate) const DEFAULT_API_VERSION: &str = "v1alpha";

/// Configuration for the Gemini REST and live clients.
#[derive(Clone, Debug)]
pub struct GeminiClientConfig {
    /// API key sent with every request.
    pub api_key: String,
    /// Base URL for REST calls. Useful for proxies or local test servers.
    pub base_url: String,
    /// Base URL for the live websocket endpoint.
    pub live_url: String,
    /// API version path segment, e.g. `v1alpha` or `v1beta`.
    pub api_version: String,
    /// Bounds establishing a connection: the TCP/TLS connect of REST calls
    /// and the live setup handshake. Whole-call deadlines come from
    /// `CallOptions`.
    pub timeout: Duration,
}

impl GeminiClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            live_url: DEFAULT_LIVE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `GEMINI_API_KEY`, with optional
    /// `GEMINI_API_VERSION` and `GEMINI_BASE_URL` overrides.
    pub fn from_env() -> Result<Self, SessionError> {
        let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(SessionError::Config(
                "missing GEMINI_API_KEY for Gemini provider".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Ok(version) = std::env::var("GEMINI_API_VERSION")
            && !version.trim().is_empty()
        {
            config.api_version = version.trim().to_string();
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL")
            && !base_url.trim().is_empty()
        {
            config.base_url = base_url.trim().to_string();
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn live_url(mut self, live_url: impl Into<String>) -> Self {
        self.live_url = live_url.into();
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/{}/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.api_version,
            model_path(model)
        )
    }

    pub(crate) fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.api_version,
            model_path(model)
        )
    }

    pub(crate) fn live_endpoint(&self) -> String {
        format!(
            "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent?key={}",
            self.live_url.trim_end_matches('/'),
            self.api_version,
            self.api_key
        )
    }
}

/// Resource path for a model id; accepts both `gemini-x` and `models/gemini-x`.
pub(crate) fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_API_VERSION");
            env::remove_var("GEMINI_BASE_URL");
        }
    }

    #[test]
    #[serial]
    fn from_env_requires_api_key() {
        clear_env_vars();
        let err = GeminiClientConfig::from_env().expect_err("missing key");
        assert!(matches!(err, SessionError::Config(msg) if msg.contains("GEMINI_API_KEY")));

        unsafe {
            env::set_var("GEMINI_API_KEY", "   ");
        }
        assert!(GeminiClientConfig::from_env().is_err());
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn from_env_applies_defaults_and_overrides() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }
        let config = GeminiClientConfig::from_env().expect("config");
        assert_eq!(config.api_key, "test-gemini-key");
        assert_eq!(config.api_version, "v1alpha");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);

        unsafe {
            env::set_var("GEMINI_API_VERSION", "v1beta");
            env::set_var("GEMINI_BASE_URL", "http://localhost:8080/");
        }
        let config = GeminiClientConfig::from_env().expect("config");
        assert_eq!(config.api_version, "v1beta");
        assert_eq!(
            config.stream_url("gemini-2.5-flash"),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
        clear_env_vars();
    }

    #[test]
    fn urls_accept_prefixed_model_names() {
        let config = GeminiClientConfig::new("k");
        assert_eq!(
            config.generate_url("models/gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1alpha/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            config.live_endpoint(),
            "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent?key=k"
        );
    }
}
