use std::sync::Arc;

use crate::{
    auth::PortalSession,
    config::PortalConfig,
    requests::{RequestClient, Transport},
    sync::{PortalStore, Synchronizer},
};

/// Everything a process needs to talk to the portal, wired together.
pub struct PortalContext {
    pub config: PortalConfig,
    pub session: Arc<PortalSession>,
    pub store: Arc<PortalStore>,
    pub synchronizer: Synchronizer,
}

impl PortalContext {
    pub fn new() -> anyhow::Result<Self> {
        let config = PortalConfig::from_env()?;
        let transport = RequestClient::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: PortalConfig, transport: Arc<dyn Transport>) -> Self {
        let session = Arc::new(PortalSession::new(transport, config.endpoints.clone()));
        let store = Arc::new(PortalStore::new());
        let synchronizer = Synchronizer::new(Arc::clone(&session), Arc::clone(&store));
        PortalContext {
            config,
            session,
            store,
            synchronizer,
        }
    }
}
