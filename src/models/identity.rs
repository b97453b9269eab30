//! Agent identity fixed at startup.

use reqwest::Url;

use crate::{AppError, Result};

/// Immutable identity of this agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    device_id: u64,
    dispatch_host: String,
}

impl AgentIdentity {
    /// Build an identity from the command-line arguments.
    ///
    /// The host must be an absolute `http` or `https` URL; a trailing slash
    /// is dropped so paths can be appended verbatim.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the host is not a usable URL.
    pub fn new(device_id: u64, dispatch_host: &str) -> Result<Self> {
        let url = Url::parse(dispatch_host)
            .map_err(|err| AppError::Config(format!("invalid dispatch host: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "dispatch host must use http or https, got {}",
                url.scheme()
            )));
        }

        Ok(Self {
            device_id,
            dispatch_host: dispatch_host.trim_end_matches('/').to_owned(),
        })
    }

    /// Device identifier assigned by the dispatcher.
    #[must_use]
    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Base URL of the dispatcher without a trailing slash.
    #[must_use]
    pub fn dispatch_host(&self) -> &str {
        &self.dispatch_host
    }
}
