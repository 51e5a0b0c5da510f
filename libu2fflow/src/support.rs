use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::device::DeviceBackend;
use crate::error::{ClassifiedError, Error};

pub const INSECURE_CHANNEL: &str = "U2F isn't supported over http, only https";
pub const NOT_SUPPORTED: &str = "U2F not supported";

/// Capability check consulted before any challenge is fetched or presented.
#[async_trait]
pub trait Support: Send + Sync {
    async fn is_supported(&self) -> bool;
    async fn ensure_support(&self) -> Result<(), Error>;
}

/// Resolves, once, whether a device backend can be used against `origin`.
///
/// Resolution happens on the first `is_supported` or `ensure_support` call and
/// is cached for the lifetime of the probe.
pub struct SupportProbe {
    origin: Url,
    allow_insecure: bool,
    device: Option<Arc<dyn DeviceBackend>>,
    backend: OnceCell<Option<Arc<dyn DeviceBackend>>>,
}

impl SupportProbe {
    pub fn new(origin: Url, device: Option<Arc<dyn DeviceBackend>>) -> Self {
        Self {
            origin,
            allow_insecure: false,
            device,
            backend: OnceCell::new(),
        }
    }

    /// Accept plain-http relying parties. Only meant for local testing.
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    fn insecure(&self) -> bool {
        self.origin.scheme() == "http" && !self.allow_insecure
    }

    #[instrument(skip_all, fields(origin = %self.origin))]
    async fn backend(&self) -> Option<&Arc<dyn DeviceBackend>> {
        self.backend
            .get_or_init(|| async {
                if self.insecure() {
                    warn!("Refusing U2F over an insecure channel");
                    return None;
                }
                if self.device.is_none() {
                    warn!("No device backend available");
                }
                debug!(supported = self.device.is_some(), "Resolved U2F backend");
                self.device.clone()
            })
            .await
            .as_ref()
    }
}

#[async_trait]
impl Support for SupportProbe {
    async fn is_supported(&self) -> bool {
        self.backend().await.is_some()
    }

    async fn ensure_support(&self) -> Result<(), Error> {
        if self.backend().await.is_some() {
            return Ok(());
        }
        let message = if self.insecure() {
            INSECURE_CHANNEL
        } else {
            NOT_SUPPORTED
        };
        Err(ClassifiedError::unsupported(message).into())
    }
}
