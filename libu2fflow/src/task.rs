use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::classify::{classify, FlowKind};
use crate::device::DeviceOutcome;
use crate::error::{ClassifiedError, Error, TransportError};

/// Shared view of a task's cancellation flag. The flag is never reset.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One attempt at a device action.
///
/// Cancellation is advisory: the action keeps running, but whatever it
/// reports after [`CancelHandle::cancel`] resolves as `Cancelled`.
#[derive(Debug)]
pub struct CancellableTask {
    id: u64,
    flow: FlowKind,
    ineligible: Option<String>,
    handle: CancelHandle,
}

impl CancellableTask {
    pub fn new(id: u64, flow: FlowKind, ineligible: Option<String>) -> Self {
        Self {
            id,
            flow,
            ineligible,
            handle: CancelHandle::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Awaits `action` once and turns its outcome into the serialized payload.
    #[instrument(skip_all, fields(task = self.id, flow = ?self.flow))]
    pub async fn run<F>(self, action: F) -> Result<String, Error>
    where
        F: Future<Output = Result<DeviceOutcome, Error>>,
    {
        let result = action.await;

        if self.is_cancelled() {
            warn!("Device operation finished after cancellation, discarding result");
            return Err(ClassifiedError::cancelled().into());
        }

        let outcome = result?;
        if !outcome.is_success() {
            let error = classify(outcome.status, self.flow, self.ineligible.as_deref());
            debug!(status = outcome.status, kind = ?error.kind, "Device reported failure");
            return Err(error.into());
        }

        let payload = outcome
            .payload
            .ok_or_else(|| TransportError::InvalidPayload("missing device payload".to_owned()))?;
        Ok(serde_json::to_string(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::classify::{DeviceStatus, INCORRECT_DEVICE};
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn success_serializes_payload() {
        let task = CancellableTask::new(1, FlowKind::Registration, None);
        let payload = json!({"version": "U2F_V2", "registrationData": "rd", "clientData": "cd"});
        let result = task
            .run(async { Ok::<_, Error>(DeviceOutcome::success(payload.clone())) })
            .await
            .unwrap();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&result).unwrap(), payload);
    }

    #[tokio::test]
    async fn cancellation_beats_late_success() {
        let task = CancellableTask::new(1, FlowKind::Authentication, None);
        let handle = task.handle();
        let result = task
            .run(async move {
                handle.cancel();
                Ok::<_, Error>(DeviceOutcome::success(json!({})))
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let task = CancellableTask::new(1, FlowKind::Authentication, None);
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        let result = task
            .run(async { Ok::<_, Error>(DeviceOutcome::failure(DeviceStatus::DeviceIneligible)) })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn failure_status_is_classified() {
        let task = CancellableTask::new(1, FlowKind::Authentication, None);
        let error = task
            .run(async { Ok::<_, Error>(DeviceOutcome::failure(DeviceStatus::DeviceIneligible)) })
            .await
            .unwrap_err();
        assert_eq!(
            error,
            Error::Classified(ClassifiedError::new(
                ErrorKind::DeviceIneligible,
                INCORRECT_DEVICE
            ))
        );
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let task = CancellableTask::new(1, FlowKind::Registration, None);
        let error = task
            .run(async { Err::<DeviceOutcome, _>(Error::from(TransportError::DeviceDisconnected)) })
            .await
            .unwrap_err();
        assert_eq!(error, Error::Transport(TransportError::DeviceDisconnected));
    }
}
