use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::Client;
use crate::backend::Connector;
use crate::BackoffPolicy;
use crate::ChangeNotifier;
use crate::CoordConfig;
use crate::Error;
use crate::FailurePolicy;
use crate::LockFacade;
use crate::NodeRepository;
use crate::Result;
use crate::Session;

pub struct ClientBuilder {
    config: CoordConfig,
    connector: Arc<dyn Connector>,
}

impl ClientBuilder {
    pub fn new(
        config: CoordConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self { config, connector }
    }

    /// Comma separated `host:port` list
    pub fn server_addr(
        mut self,
        servers: impl Into<String>,
    ) -> Self {
        self.config.session.server_addr = servers.into();
        self
    }

    /// Prefix applied to every node path
    pub fn namespace(
        mut self,
        namespace: impl Into<String>,
    ) -> Self {
        self.config.session.namespace = namespace.into();
        self
    }

    /// `user:password` digest credential; nodes become creator-only
    pub fn digest(
        mut self,
        credential: impl Into<String>,
    ) -> Self {
        self.config.session.digest = Some(credential.into());
        self
    }

    pub fn session_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connection_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retry_policy(
        mut self,
        policy: BackoffPolicy,
    ) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn read_failure_policy(
        mut self,
        policy: FailurePolicy,
    ) -> Self {
        self.config.repository.read_failure_policy = policy;
        self
    }

    /// Completely replaces the configuration
    ///
    /// # Warning: Configuration Override
    /// This will discard all previous settings configured through individual
    /// methods like [`namespace`](ClientBuilder::namespace) or
    /// [`digest`](ClientBuilder::digest).
    pub fn set_config(
        mut self,
        config: CoordConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration, connects and wires every component to
    /// the shared session.
    ///
    /// Fails with [`Error::Disabled`] when `enable = false`.
    pub async fn build(self) -> Result<Client> {
        if !self.config.enable {
            return Err(Error::Disabled);
        }
        let config = self.config.validate()?;
        let session = Session::connect(&config, self.connector).await?;

        info!(config = ?config, "coordination client started");
        Ok(Client {
            inner: Arc::new(super::ClientInner {
                repository: NodeRepository::new(session.clone(), &config.repository),
                notifier: ChangeNotifier::new(session.clone(), &config.session.root_path),
                locks: LockFacade::new(session.clone()),
                session,
                config,
            }),
        })
    }

    /// Like [`build`](ClientBuilder::build), but a disabled configuration
    /// yields `None` instead of an error.
    pub async fn start_if_enabled(self) -> Result<Option<Client>> {
        if !self.config.enable {
            info!("coordination client disabled by configuration");
            return Ok(None);
        }
        self.build().await.map(Some)
    }
}
