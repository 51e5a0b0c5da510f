pub mod adapter;
pub mod model;
pub mod soft;

use std::time::Duration;

pub use model::{
    ClientData, DeviceOutcome, RegisterRequest, RegisterResponse, RegisteredKey,
    RegistrationChallenge, SignChallenge, SignResponse,
};
pub use soft::{SoftToken, UserPresence};

/// Invoked exactly once by a backend when the token reports.
pub type DeviceCallback = Box<dyn FnOnce(DeviceOutcome) + Send + 'static>;

/// Callback-style access to a U2F token, shaped after the U2F JavaScript API.
///
/// Implementations must invoke the callback at most once. Dropping it without
/// calling it is reported as a disconnected device by [`adapter`].
pub trait DeviceBackend: Send + Sync {
    fn register(
        &self,
        app_id: &str,
        register_requests: &[RegisterRequest],
        registered_keys: &[RegisteredKey],
        callback: DeviceCallback,
        timeout: Duration,
    );

    fn sign(
        &self,
        app_id: &str,
        challenge: &str,
        registered_keys: &[RegisteredKey],
        callback: DeviceCallback,
        timeout: Duration,
    );
}
