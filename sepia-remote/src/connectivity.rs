//! # Connectivity Monitor
//!
//! Bridges platform reachability signals into a coarse [`NetworkStatus`] and
//! fans out changes to registered observers. Fan-out happens on the same
//! worker queue the calls run on, so observers never race call-state
//! transitions.
//!
//! The signal source is platform-specific and external to this crate; the
//! portable contract is the status enum, observer registration, and the
//! fan-out discipline. Higher layers consult the monitor to decide when to
//! re-issue calls after a reachability change; this layer makes no retry
//! decisions itself.
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::queue::WorkerQueue;

/// Coarse network reachability, as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkStatus {
    Unreachable,
    ReachableWifi,
    ReachableCellular,
}

type Observer = Arc<dyn Fn(NetworkStatus) + Send + Sync + 'static>;

/// Records the last observed status and notifies observers of changes.
pub struct ConnectivityMonitor {
    queue: WorkerQueue,
    state: Mutex<MonitorState>,
}

struct MonitorState {
    status: Option<NetworkStatus>,
    observers: Vec<Observer>,
}

impl ConnectivityMonitor {
    pub fn new(queue: WorkerQueue) -> Self {
        Self {
            queue,
            state: Mutex::new(MonitorState {
                status: None,
                observers: Vec::new(),
            }),
        }
    }

    /// Registers an observer. Observers live as long as the monitor and are
    /// invoked in registration order on every status change. They run on the
    /// worker queue and must not perform long synchronous work.
    pub fn add_observer(&self, observer: impl Fn(NetworkStatus) + Send + Sync + 'static) {
        self.state.lock().unwrap().observers.push(Arc::new(observer));
    }

    /// Records the first observed status without notifying anyone; there is
    /// no prior state to have transitioned from. No-op once a status exists.
    pub fn set_initial_status(&self, status: NetworkStatus) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_none() {
            state.status = Some(status);
        }
    }

    /// Records a status observation and, if it differs from the previous
    /// one, notifies every observer on the worker queue. Consecutive
    /// identical statuses are coalesced.
    pub fn update_status(&self, status: NetworkStatus) {
        let observers: Vec<Observer> = {
            let mut state = self.state.lock().unwrap();
            if state.status == Some(status) {
                return;
            }
            state.status = Some(status);
            state.observers.clone()
        };
        debug!(?status, "network status changed");
        self.queue.enqueue(move || {
            for observer in &observers {
                observer.as_ref()(status);
            }
        });
    }

    /// The last observed status, if any observation has been made yet.
    pub fn status(&self) -> Option<NetworkStatus> {
        self.state.lock().unwrap().status
    }
}
