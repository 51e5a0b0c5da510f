use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument};

use crate::config::ClientConfig;
use crate::device::DeviceBackend;
use crate::error::{ConfigError, Error};
use crate::flow::{DeviceContext, RegistrationFlow, UnlockFlow};
use crate::support::{Support, SupportProbe};
use crate::transport::{HttpTransport, Transport, VerifyResult};

/// Runs complete ceremonies against one relying party: the device response
/// from each flow is handed back to the server for confirmation.
pub struct U2fClient {
    transport: Arc<dyn Transport>,
    support: Arc<dyn Support>,
    registration: RegistrationFlow,
    unlock: UnlockFlow,
}

impl U2fClient {
    pub fn new(config: &ClientConfig, device: Arc<dyn DeviceBackend>) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = HttpTransport::new(&config.server_url, &config.username)?;
        let support = SupportProbe::new(transport.base_url().clone(), Some(device.clone()))
            .allow_insecure(config.allow_insecure);
        let context =
            DeviceContext::new(Arc::new(support), device).with_timeout(config.device_timeout());
        Ok(Self::with_transport(Arc::new(transport), context))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, context: DeviceContext) -> Self {
        Self {
            support: context.support.clone(),
            registration: RegistrationFlow::registration(transport.clone(), context.clone()),
            unlock: UnlockFlow::new(transport.clone(), context),
            transport,
        }
    }

    pub async fn is_supported(&self) -> bool {
        self.support.is_supported().await
    }

    /// Registers the device and has the relying party bind it to the account.
    #[instrument(skip_all)]
    pub async fn register_device(&self) -> Result<Value, Error> {
        let response = self.registration.start(()).await?;
        info!("Registration response received from device");
        let confirmation = self.transport.confirm_registration(&response).await?;
        info!(%confirmation, "Relying party confirmed registration");
        Ok(confirmation)
    }

    /// Signs a fresh challenge, optionally bound to `data`, and verifies it.
    #[instrument(skip_all, fields(with_data = data.is_some()))]
    pub async fn sign_data(&self, data: Option<String>) -> Result<VerifyResult, Error> {
        self.unlock.submit_data(data);
        let response = self.unlock.start().await?;
        info!("Signature response received from device");
        let verified = self.transport.verify_signature(&response).await?;
        info!(counter = verified.counter, "Relying party verified signature");
        Ok(verified)
    }

    pub fn cancel(&self) {
        self.registration.stop();
        self.unlock.stop();
    }

    pub fn registration(&self) -> &RegistrationFlow {
        &self.registration
    }

    pub fn unlock(&self) -> &UnlockFlow {
        &self.unlock
    }
}
