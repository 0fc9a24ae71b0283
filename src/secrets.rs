use std::collections::HashMap;

use anyhow::{Context, bail};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::auth::Credentials;

const PASSWORD_VAR: &str = "DOOR_PASSWORD";

/// Where passwords live between runs. The core never persists credentials
/// itself; platform keychains plug in here.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, id: &str) -> anyhow::Result<Option<String>>;

    async fn set_secret(&self, id: &str, password: &str) -> anyhow::Result<()>;

    /// Credentials for `id`, if a password is stored for it.
    async fn credentials(&self, id: &str) -> anyhow::Result<Credentials> {
        let password = self
            .get_secret(id)
            .await?
            .with_context(|| format!("no password stored for {id}"))?;
        Ok(Credentials::new(id, password))
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, id: &str) -> anyhow::Result<Option<String>> {
        Ok(self.secrets.read().get(id).cloned())
    }

    async fn set_secret(&self, id: &str, password: &str) -> anyhow::Result<()> {
        self.secrets
            .write()
            .insert(id.to_string(), password.to_string());
        Ok(())
    }
}

/// Reads `DOOR_PASSWORD`, whatever the id. Read-only.
#[derive(Debug, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, _id: &str) -> anyhow::Result<Option<String>> {
        match std::env::var(PASSWORD_VAR) {
            Ok(password) if !password.is_empty() => Ok(Some(password)),
            Ok(_) | Err(std::env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(err).context(PASSWORD_VAR),
        }
    }

    async fn set_secret(&self, _id: &str, _password: &str) -> anyhow::Result<()> {
        bail!("{PASSWORD_VAR} cannot be written from here")
    }
}
