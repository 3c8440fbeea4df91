//! Per-client latest-wins request registry.
//!
//! Not a FIFO queue: each client holds at most one live request. Admitting a
//! new request cancels the previous one before it is replaced, so within a
//! client the ordering admission → predecessor cancellation → predecessor
//! termination always holds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use completion_gateway_core::observability::set_active_requests;

use crate::config::StreamControllerConfig;

/// Lifecycle wrapper for one admitted request.
#[derive(Debug)]
pub struct ClientRequest {
    pub client_id: String,
    pub completion_id: String,
    pub model: String,
    pub received_at: Instant,
    /// Hard deadline derived from `completionTimeoutMs` at admission.
    pub deadline: Instant,
    /// Cancellation capability; child tokens propagate to fan-out and the
    /// upstream call.
    pub cancel: CancellationToken,
    canceled: AtomicBool,
    removed: AtomicBool,
}

impl ClientRequest {
    /// Cancel because a newer request from the same client arrived.
    pub fn cancel_superseded(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

pub struct ClientQueueManager {
    latest: Mutex<HashMap<String, Arc<ClientRequest>>>,
    active: AtomicUsize,
    completion_timeout: Duration,
    idle_ttl: Duration,
}

impl ClientQueueManager {
    pub fn new(cfg: &StreamControllerConfig) -> Arc<Self> {
        Arc::new(Self {
            latest: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            completion_timeout: cfg.completion_timeout(),
            idle_ttl: cfg.idle_ttl(),
        })
    }

    /// Admit a request: cancel the client's previous one (if any), then
    /// store this as the latest.
    pub fn add(&self, client_id: &str, completion_id: &str, model: &str) -> Arc<ClientRequest> {
        let now = Instant::now();
        let request = Arc::new(ClientRequest {
            client_id: client_id.to_string(),
            completion_id: completion_id.to_string(),
            model: model.to_string(),
            received_at: now,
            deadline: now + self.completion_timeout,
            cancel: CancellationToken::new(),
            canceled: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        });

        let mut guard = self.lock();
        if let Some(previous) = guard.get(client_id) {
            debug!(
                client_id = %client_id,
                superseded = %previous.completion_id,
                by = %completion_id,
                "cancelling superseded request"
            );
            previous.cancel_superseded();
        }
        guard.insert(client_id.to_string(), Arc::clone(&request));
        drop(guard);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        set_active_requests(active as i64);
        request
    }

    /// Release a request. Clears the latest slot only when it still points
    /// at this request; safe to call more than once.
    pub fn remove(&self, request: &ClientRequest) {
        if request.removed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut guard = self.lock();
        if guard
            .get(&request.client_id)
            .is_some_and(|latest| latest.completion_id == request.completion_id)
        {
            guard.remove(&request.client_id);
        }
        drop(guard);

        let active = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        set_active_requests(active as i64);
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn latest_for(&self, client_id: &str) -> Option<Arc<ClientRequest>> {
        self.lock().get(client_id).cloned()
    }

    /// Spawn the periodic maintenance task: drops entries whose deadline is
    /// long past (their owning task died without removing them) and logs
    /// queue statistics.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        });
    }

    fn sweep(&self) {
        let now = Instant::now();
        let stale: Vec<Arc<ClientRequest>> = {
            let guard = self.lock();
            guard
                .values()
                .filter(|req| now > req.deadline + self.idle_ttl)
                .cloned()
                .collect()
        };
        for request in &stale {
            request.cancel_superseded();
            self.remove(request);
        }

        info!(
            active = self.active_count(),
            clients = self.lock().len(),
            swept = stale.len(),
            "client queue statistics"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ClientRequest>>> {
        match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
