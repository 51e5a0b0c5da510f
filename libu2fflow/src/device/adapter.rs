use std::time::Duration;

use tokio::sync::oneshot::{channel, Receiver, Sender};
use tracing::{debug, instrument, warn};

use super::{DeviceBackend, DeviceOutcome, RegistrationChallenge, SignChallenge};
use crate::classify::DeviceStatus;
use crate::error::{Error, TransportError};

// Lets a backend that honours its own timeout report before we give up on it.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

#[instrument(skip_all, fields(app_id = %challenge.app_id))]
pub async fn register(
    backend: &dyn DeviceBackend,
    challenge: &RegistrationChallenge,
    timeout: Duration,
) -> Result<DeviceOutcome, Error> {
    let (tx, rx): (Sender<DeviceOutcome>, Receiver<DeviceOutcome>) = channel();
    backend.register(
        &challenge.app_id,
        &challenge.register_requests,
        &challenge.registered_keys,
        Box::new(move |outcome| {
            // The receiver is gone if the adapter already timed out.
            let _ = tx.send(outcome);
        }),
        timeout,
    );
    wait(rx, timeout).await
}

#[instrument(skip_all, fields(app_id = %challenge.app_id))]
pub async fn sign(
    backend: &dyn DeviceBackend,
    challenge: &SignChallenge,
    timeout: Duration,
) -> Result<DeviceOutcome, Error> {
    let (tx, rx): (Sender<DeviceOutcome>, Receiver<DeviceOutcome>) = channel();
    backend.sign(
        &challenge.app_id,
        &challenge.challenge,
        &challenge.registered_keys,
        Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
        timeout,
    );
    wait(rx, timeout).await
}

async fn wait(rx: Receiver<DeviceOutcome>, timeout: Duration) -> Result<DeviceOutcome, Error> {
    match tokio::time::timeout(timeout + TIMEOUT_GRACE, rx).await {
        Ok(Ok(outcome)) => {
            debug!(status = outcome.status, "Device reported");
            Ok(outcome)
        }
        Ok(Err(_)) => {
            warn!("Device callback dropped without an outcome");
            Err(Error::Transport(TransportError::DeviceDisconnected))
        }
        Err(_) => {
            warn!(?timeout, "Device did not report in time");
            Ok(DeviceOutcome::failure(DeviceStatus::Timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::device::{DeviceCallback, RegisterRequest, RegisteredKey};

    /// Keeps callbacks around so tests decide when (and whether) the device answers.
    #[derive(Default)]
    struct HeldBackend {
        pending: Mutex<Vec<DeviceCallback>>,
    }

    impl DeviceBackend for HeldBackend {
        fn register(
            &self,
            _: &str,
            _: &[RegisterRequest],
            _: &[RegisteredKey],
            callback: DeviceCallback,
            _: Duration,
        ) {
            self.pending.lock().unwrap().push(callback);
        }

        fn sign(&self, _: &str, _: &str, _: &[RegisteredKey], callback: DeviceCallback, _: Duration) {
            self.pending.lock().unwrap().push(callback);
        }
    }

    struct DroppingBackend;

    impl DeviceBackend for DroppingBackend {
        fn register(
            &self,
            _: &str,
            _: &[RegisterRequest],
            _: &[RegisteredKey],
            _: DeviceCallback,
            _: Duration,
        ) {
        }

        fn sign(&self, _: &str, _: &str, _: &[RegisteredKey], _: DeviceCallback, _: Duration) {}
    }

    fn sign_challenge() -> SignChallenge {
        SignChallenge {
            app_id: "https://rp.example".to_owned(),
            challenge: "challenge".to_owned(),
            registered_keys: vec![],
        }
    }

    #[tokio::test]
    async fn callback_outcome_is_returned() {
        let backend = HeldBackend::default();
        let challenge = sign_challenge();
        let pending = sign(&backend, &challenge, Duration::from_secs(20));
        tokio::pin!(pending);

        assert!(futures::poll!(&mut pending).is_pending());
        let callback = backend.pending.lock().unwrap().pop().unwrap();
        callback(DeviceOutcome::success(json!({"keyHandle": "kh"})));

        let outcome = pending.await.unwrap();
        assert!(outcome.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out_with_status_five() {
        let backend = HeldBackend::default();
        let outcome = sign(&backend, &sign_challenge(), Duration::from_secs(20))
            .await
            .unwrap();
        assert_eq!(outcome, DeviceOutcome::failure(DeviceStatus::Timeout));
    }

    #[tokio::test]
    async fn dropped_callback_is_a_transport_error() {
        let challenge = RegistrationChallenge {
            app_id: "https://rp.example".to_owned(),
            register_requests: vec![],
            registered_keys: vec![],
        };
        let result = register(&DroppingBackend, &challenge, Duration::from_secs(1)).await;
        assert_eq!(
            result,
            Err(Error::Transport(TransportError::DeviceDisconnected))
        );
    }
}
