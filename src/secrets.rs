#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use parking_lot::Mutex;
use secrecy::SecretString;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub const MAPS_KEY_ALIAS: &str = "google-maps-api-key";
pub const PHOTO_SAS_ALIAS: &str = "photo-container-sas";

/// Where a resolved secret came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretSource {
    Environment,
    Keychain,
}

impl SecretSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretSource::Environment => "environment",
            SecretSource::Keychain => "keychain",
        }
    }
}

#[derive(Clone)]
pub struct SecretVault {
    service_name: String,
    backend: SecretBackend,
}

#[derive(Clone)]
enum SecretBackend {
    Keyring,
    #[cfg(test)]
    Memory(Arc<Mutex<HashMap<String, SecretString>>>),
}

impl SecretVault {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            backend: SecretBackend::Keyring,
        }
    }

    /// Vault backed by a map seeded with `(account, value)` pairs.
    #[cfg(test)]
    pub fn in_memory(entries: &[(&str, &str)]) -> Self {
        let entries = entries
            .iter()
            .map(|(account, value)| {
                (
                    account.to_string(),
                    SecretString::new(value.to_string().into()),
                )
            })
            .collect();
        Self {
            service_name: "in-memory".to_string(),
            backend: SecretBackend::Memory(Arc::new(Mutex::new(entries))),
        }
    }

    /// Prefers an explicitly configured value and falls back to the keychain.
    pub fn resolve(
        &self,
        account: &str,
        configured: Option<&SecretString>,
    ) -> AppResult<Option<(SecretString, SecretSource)>> {
        if let Some(secret) = configured {
            return Ok(Some((secret.clone(), SecretSource::Environment)));
        }
        let found = self.get(account)?;
        if found.is_some() {
            debug!(
                target: "secret_vault",
                service = %self.service_name,
                account,
                "loaded secret from keychain"
            );
        }
        Ok(found.map(|secret| (secret, SecretSource::Keychain)))
    }

    pub fn require(
        &self,
        account: &str,
        configured: Option<&SecretString>,
    ) -> AppResult<(SecretString, SecretSource)> {
        self.resolve(account, configured)?.ok_or_else(|| {
            AppError::Config(format!(
                "secret `{account}` is neither configured nor stored in the keychain"
            ))
        })
    }

    fn get(&self, account: &str) -> AppResult<Option<SecretString>> {
        match &self.backend {
            SecretBackend::Keyring => {
                let entry = keyring::Entry::new(&self.service_name, account)?;
                match entry.get_password() {
                    Ok(value) => Ok(Some(SecretString::new(value.into()))),
                    Err(keyring::Error::NoEntry) => Ok(None),
                    Err(err) => Err(AppError::from(err)),
                }
            }
            #[cfg(test)]
            SecretBackend::Memory(store) => Ok(store.lock().get(account).cloned()),
        }
    }
}
