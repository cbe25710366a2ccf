use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::live::{LiveConnector, LiveSession, LiveSetup};
use crate::provider::ProviderAdapter;
use crate::session::Session;

struct ClientInner {
    provider: Arc<dyn ProviderAdapter>,
    live: Option<Arc<dyn LiveConnector>>,
}

/// Entry point for creating sessions. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Starts a builder for wiring the provider and optional live connector.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Creates a conversation session with an empty history.
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(self.inner.provider.clone(), config)
    }

    /// Creates a disconnected live session.
    pub fn live(&self, config: &SessionConfig) -> Result<LiveSession, SessionError> {
        let connector = self
            .inner
            .live
            .clone()
            .ok_or_else(|| SessionError::Config("client has no live connector".into()))?;
        Ok(LiveSession::new(connector, LiveSetup::from(config)))
    }

    /// Connects a live session, runs `body` with it and closes it on every
    /// exit path.
    ///
    /// An error from `body` takes precedence over an error from closing.
    pub async fn with_live<T, F>(&self, config: &SessionConfig, body: F) -> Result<T, SessionError>
    where
        F: for<'a> FnOnce(&'a mut LiveSession) -> BoxFuture<'a, Result<T, SessionError>>,
    {
        let mut session = self.live(config)?;
        if let Err(err) = session.connect().await {
            let _ = session.close().await;
            return Err(err);
        }
        let result = body(&mut session).await;
        let closed = session.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(session_id = %session.id(), error = %close_err, "live close failed after body error");
                Err(err)
            }
        }
    }
}

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    provider: Option<Arc<dyn ProviderAdapter>>,
    live: Option<Arc<dyn LiveConnector>>,
}

impl ClientBuilder {
    /// Sets the adapter used for request/response calls.
    pub fn provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the connector used for live sessions.
    pub fn live_connector(mut self, connector: Arc<dyn LiveConnector>) -> Self {
        self.live = Some(connector);
        self
    }

    pub fn build(self) -> Result<Client, SessionError> {
        let provider = self
            .provider
            .ok_or_else(|| SessionError::Config("a provider adapter is required".into()))?;
        Ok(Client {
            inner: Arc::new(ClientInner {
                provider,
                live: self.live,
            }),
        })
    }
}
