//! Identity-based reconnect: finding a removed device again, and the timer
//! that drives the search.

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use serial_mcp_core::DeviceIdentity;
use serial_mcp_port::{PortDiscovery, PortHandle};

/// Finds a previously used device among the ports currently present.
///
/// Stateless between calls; the session owns the timer.
#[derive(Clone)]
pub struct ReconnectPolicy {
    discovery: Arc<dyn PortDiscovery>,
}

impl std::fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectPolicy").finish_non_exhaustive()
    }
}

impl ReconnectPolicy {
    /// Create a policy searching `discovery`.
    pub fn new(discovery: Arc<dyn PortDiscovery>) -> Self {
        Self { discovery }
    }

    /// The first authorised port whose identity equals `known`.
    pub async fn probe(&self, known: DeviceIdentity) -> Option<Arc<dyn PortHandle>> {
        let found = self
            .discovery
            .list_authorized_ports()
            .await
            .into_iter()
            .find(|port| port.identity() == Some(known));
        debug!(
            "Reconnect probe for {}: {}",
            known,
            found.as_ref().map_or("not present", |p| p.name())
        );
        found
    }
}

/// Future returned by one timer tick.
pub type TickFuture = Pin<Box<dyn Future<Output = ControlFlow<()>> + Send>>;

/// Callback run on every tick. Returning `Break` stops the timer.
pub type Tick = Box<dyn FnMut() -> TickFuture + Send>;

/// Runs a callback periodically.
pub trait Scheduler: Send + Sync {
    /// Run `tick` every `period`, first after one full period.
    fn every(&self, period: Duration, tick: Tick) -> PeriodicTask;
}

/// Handle to a running periodic callback.
///
/// Dropping the handle leaves the callback running until it stops itself;
/// use [`cancel`](Self::cancel) to stop it from outside.
#[derive(Debug)]
pub struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Wrap a spawned task.
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    /// Stop the callback. A tick in progress is abandoned at its next await.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Whether the callback has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// [`Scheduler`] on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn every(&self, period: Duration, mut tick: Tick) -> PeriodicTask {
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().await.is_break() {
                    break;
                }
            }
        });
        PeriodicTask::new(handle)
    }
}
