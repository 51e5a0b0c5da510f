//! Registration, authentication and unlock flows over [`RestartableService`].

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, info, instrument};

use crate::classify::FlowKind;
use crate::device::{adapter, DeviceBackend, DeviceOutcome, SignChallenge};
use crate::error::Error;
use crate::service::{FlowAction, RestartableService, ServiceState};
use crate::support::Support;
use crate::transport::Transport;

pub const ALREADY_REGISTERED: &str = "This device is already registered.";
pub const NOT_REGISTERED: &str =
    "This device is not registered for this account, please register the device in user settings.";

pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(20);

/// Produces the sign challenge for one authentication attempt.
pub type ChallengeProvider =
    Box<dyn FnOnce() -> BoxFuture<'static, Result<SignChallenge, Error>> + Send>;

pub fn challenge_provider<F, Fut>(provider: F) -> ChallengeProvider
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<SignChallenge, Error>> + Send + 'static,
{
    Box::new(move || Box::pin(provider()))
}

/// What every flow needs besides the relying party.
#[derive(Clone)]
pub struct DeviceContext {
    pub support: Arc<dyn Support>,
    pub device: Arc<dyn DeviceBackend>,
    pub timeout: Duration,
}

impl DeviceContext {
    pub fn new(support: Arc<dyn Support>, device: Arc<dyn DeviceBackend>) -> Self {
        Self {
            support,
            device,
            timeout: DEVICE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct Registration {
    transport: Arc<dyn Transport>,
    context: DeviceContext,
    ineligible: Option<String>,
}

impl Registration {
    pub fn new(transport: Arc<dyn Transport>, context: DeviceContext) -> Self {
        Self {
            transport,
            context,
            ineligible: Some(ALREADY_REGISTERED.to_owned()),
        }
    }
}

#[async_trait]
impl FlowAction for Registration {
    type Input = ();

    fn flow(&self) -> FlowKind {
        FlowKind::Registration
    }

    fn ineligible_message(&self) -> Option<&str> {
        self.ineligible.as_deref()
    }

    #[instrument(skip_all)]
    async fn perform(&self, _: ()) -> Result<DeviceOutcome, Error> {
        self.context.support.ensure_support().await?;
        let challenge = self.transport.fetch_registration_challenge().await?;
        info!(
            app_id = %challenge.app_id,
            excluded = challenge.registered_keys.len(),
            "Presenting registration request to device"
        );
        adapter::register(&*self.context.device, &challenge, self.context.timeout).await
    }
}

pub struct Authentication {
    context: DeviceContext,
    ineligible: Option<String>,
}

impl Authentication {
    pub fn new(context: DeviceContext) -> Self {
        Self {
            context,
            ineligible: Some(NOT_REGISTERED.to_owned()),
        }
    }

    /// `None` falls back to the generic incorrect-device message.
    pub fn with_ineligible_message(mut self, message: Option<&str>) -> Self {
        self.ineligible = message.map(str::to_owned);
        self
    }
}

#[async_trait]
impl FlowAction for Authentication {
    type Input = ChallengeProvider;

    fn flow(&self) -> FlowKind {
        FlowKind::Authentication
    }

    fn ineligible_message(&self) -> Option<&str> {
        self.ineligible.as_deref()
    }

    #[instrument(skip_all)]
    async fn perform(&self, provider: ChallengeProvider) -> Result<DeviceOutcome, Error> {
        self.context.support.ensure_support().await?;
        let challenge = provider().await?;
        info!(
            app_id = %challenge.app_id,
            keys = challenge.registered_keys.len(),
            "Presenting sign request to device"
        );
        adapter::sign(&*self.context.device, &challenge, self.context.timeout).await
    }
}

pub type RegistrationFlow = RestartableService<Registration>;
pub type AuthenticationFlow = RestartableService<Authentication>;

impl RegistrationFlow {
    pub fn registration(transport: Arc<dyn Transport>, context: DeviceContext) -> Self {
        RestartableService::new(Registration::new(transport, context))
    }
}

impl AuthenticationFlow {
    pub fn authentication(context: DeviceContext) -> Self {
        RestartableService::new(Authentication::new(context))
    }
}

/// Authentication against the relying party's own sign endpoint.
///
/// Data passed to [`UnlockFlow::submit_data`] is sent along with the next
/// challenge request, so the relying party can bind it into the challenge.
pub struct UnlockFlow {
    service: AuthenticationFlow,
    transport: Arc<dyn Transport>,
    submitted: Mutex<Option<String>>,
}

impl UnlockFlow {
    pub fn new(transport: Arc<dyn Transport>, context: DeviceContext) -> Self {
        Self {
            service: AuthenticationFlow::authentication(context),
            transport,
            submitted: Mutex::new(None),
        }
    }

    pub fn submit_data(&self, data: Option<String>) {
        debug!(with_data = data.is_some(), "Data submitted for signing");
        *self
            .submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = data;
    }

    pub fn start(&self) -> BoxFuture<'static, Result<String, Error>> {
        let transport = self.transport.clone();
        let data = self
            .submitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        self.service.start(challenge_provider(move || async move {
            transport.fetch_sign_challenge(data.as_deref()).await
        }))
    }

    pub fn stop(&self) {
        self.service.stop();
    }

    pub fn state(&self) -> ServiceState {
        self.service.state()
    }
}
