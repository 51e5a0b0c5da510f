use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, debug_span, Instrument};

use crate::classify::FlowKind;
use crate::device::DeviceOutcome;
use crate::error::Error;
use crate::task::{CancelHandle, CancellableTask};

/// The protocol-specific half of a flow: how one attempt reaches the device.
#[async_trait]
pub trait FlowAction: Send + Sync + 'static {
    type Input: Send + 'static;

    fn flow(&self) -> FlowKind;

    /// Replaces the generic message for an ineligible device, if set.
    fn ineligible_message(&self) -> Option<&str>;

    async fn perform(&self, input: Self::Input) -> Result<DeviceOutcome, Error>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Running,
}

#[derive(Debug)]
struct CurrentTask {
    id: u64,
    handle: CancelHandle,
}

/// Single-flight runner for one [`FlowAction`]: starting again cancels the
/// attempt in progress, so only the latest start can ever succeed.
pub struct RestartableService<A: FlowAction> {
    action: Arc<A>,
    current: Arc<Mutex<Option<CurrentTask>>>,
    next_id: AtomicU64,
}

impl<A: FlowAction> RestartableService<A> {
    pub fn new(action: A) -> Self {
        Self {
            action: Arc::new(action),
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    /// Cancels any attempt in progress and begins a new one.
    ///
    /// The replacement happens before this returns, not when the returned
    /// future is first polled. Dropping the returned future releases the slot.
    pub fn start(&self, input: A::Input) -> BoxFuture<'static, Result<String, Error>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let flow = self.action.flow();
        let task = CancellableTask::new(
            id,
            flow,
            self.action.ineligible_message().map(str::to_owned),
        );

        {
            let mut slot = lock(&*self.current);
            if let Some(previous) = slot.replace(CurrentTask {
                id,
                handle: task.handle(),
            }) {
                debug!(previous = previous.id, task = id, "Cancelling superseded task");
                previous.handle.cancel();
            }
        }

        let action = self.action.clone();
        let release = SlotRelease {
            current: self.current.clone(),
            id,
        };
        let span = debug_span!("start", ?flow, task = id);
        Box::pin(
            async move {
                let result = task.run(action.perform(input)).await;
                drop(release);
                result
            }
            .instrument(span),
        )
    }

    /// Cancels the attempt in progress, if any.
    pub fn stop(&self) {
        if let Some(current) = lock(&*self.current).take() {
            debug!(task = current.id, "Stopping task");
            current.handle.cancel();
        }
    }

    pub fn state(&self) -> ServiceState {
        match *lock(&*self.current) {
            Some(_) => ServiceState::Running,
            None => ServiceState::Idle,
        }
    }
}

/// Empties the slot when its task settles or is abandoned, unless a newer
/// task has taken it over.
struct SlotRelease {
    current: Arc<Mutex<Option<CurrentTask>>>,
    id: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slot = lock(&*self.current);
        if slot.as_ref().map_or(false, |c| c.id == self.id) {
            *slot = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
