//! Per-model execution pools.
//!
//! Each configured backend gets a pool: a counting semaphore sized to the
//! backend's `maxConcurrent` plus an in-flight map for introspection. The
//! registry routes by tag with idlest-pool selection. The semaphore is the
//! sole admission gate to a backend; permits are RAII so release happens
//! exactly once on every exit path.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use completion_gateway_core::observability::set_pool_in_flight;

use crate::config::ModelConfig;
use crate::llm::LlmBackend;
use crate::postprocess::{PostProcessChain, ProcessorRegistry};
use crate::queue::ClientRequest;

/// Why a pool slot was never obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Canceled,
    Timeout,
}

#[derive(Debug, Clone)]
struct InFlightEntry {
    client_id: String,
    started_at: Instant,
}

/// Introspection view of one in-flight request.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InFlightSnapshot {
    pub completion_id: String,
    pub client_id: String,
    pub elapsed_ms: u64,
}

/// Introspection view of one pool.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub model_name: String,
    pub max_concurrent: usize,
    pub active: usize,
    pub in_flight: Vec<InFlightSnapshot>,
}

/// Discovery view of one configured model.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_name: String,
    pub tags: Vec<String>,
    pub fim_mode: bool,
    pub max_prefix_context: usize,
    pub max_suffix_context: usize,
    pub max_output_token: usize,
    pub max_concurrent: usize,
}

pub struct ModelPool {
    cfg: ModelConfig,
    backend: LlmBackend,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashMap<String, InFlightEntry>>,
    chain: PostProcessChain,
}

impl ModelPool {
    pub fn new(cfg: ModelConfig, processors: &ProcessorRegistry) -> Self {
        let backend = LlmBackend::new(&cfg);
        let chain = processors.build_chain(&cfg);
        Self {
            semaphore: Arc::new(Semaphore::new(cfg.max_concurrent)),
            in_flight: Mutex::new(HashMap::new()),
            backend,
            chain,
            cfg,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.cfg.model_name
    }

    pub fn config(&self) -> &ModelConfig {
        &self.cfg
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn chain(&self) -> &PostProcessChain {
        &self.chain
    }

    /// Requests currently holding a permit.
    pub fn active(&self) -> usize {
        self.cfg.max_concurrent - self.semaphore.available_permits()
    }

    /// Saturation in `[0, 1]`, the idlest-selection key.
    pub fn load_ratio(&self) -> f64 {
        self.active() as f64 / self.cfg.max_concurrent as f64
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let now = Instant::now();
        let in_flight = self
            .lock_in_flight()
            .iter()
            .map(|(completion_id, entry)| InFlightSnapshot {
                completion_id: completion_id.clone(),
                client_id: entry.client_id.clone(),
                elapsed_ms: now.duration_since(entry.started_at).as_millis() as u64,
            })
            .collect();
        PoolSnapshot {
            model_name: self.cfg.model_name.clone(),
            max_concurrent: self.cfg.max_concurrent,
            active: self.active(),
            in_flight,
        }
    }

    /// Wait for a pool slot bounded by the request's own deadline, then run
    /// the handler while registered in the in-flight map.
    ///
    /// Returns the handler output together with the time spent waiting for
    /// the permit. The permit is released exactly once on every exit path.
    pub async fn wait_and_run<F, Fut, T>(
        &self,
        request: &ClientRequest,
        handler: F,
    ) -> Result<(T, Duration), WaitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let wait_started = Instant::now();
        let permit = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => return Err(WaitError::Canceled),
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(request.deadline)) => {
                return Err(WaitError::Timeout);
            }
            acquired = Arc::clone(&self.semaphore).acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => {
                    // The semaphore is never closed; reaching this is a bug.
                    error!(model = %self.cfg.model_name, "pool semaphore unexpectedly closed");
                    return Err(WaitError::Canceled);
                }
            },
        };
        let queue_wait = wait_started.elapsed();

        self.register(request);
        let output = handler().await;
        self.unregister(request);
        drop(permit);
        set_pool_in_flight(&self.cfg.model_name, self.active() as i64);

        Ok((output, queue_wait))
    }

    fn register(&self, request: &ClientRequest) {
        let mut guard = self.lock_in_flight();
        guard.insert(
            request.completion_id.clone(),
            InFlightEntry {
                client_id: request.client_id.clone(),
                started_at: Instant::now(),
            },
        );
        drop(guard);
        set_pool_in_flight(&self.cfg.model_name, self.active() as i64);
        debug!(
            model = %self.cfg.model_name,
            completion_id = %request.completion_id,
            active = self.active(),
            "request entered pool"
        );
    }

    fn unregister(&self, request: &ClientRequest) {
        let removed = self.lock_in_flight().remove(&request.completion_id);
        if removed.is_none() {
            // Unregistering twice would mean a double release elsewhere.
            error!(
                model = %self.cfg.model_name,
                completion_id = %request.completion_id,
                "in-flight entry already unregistered"
            );
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, InFlightEntry>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn grab_permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .expect("test pool has free permits")
    }
}

/// All pools, indexed by model name and by every tag.
pub struct PoolRegistry {
    by_key: HashMap<String, Vec<Arc<ModelPool>>>,
    all: Vec<Arc<ModelPool>>,
}

impl PoolRegistry {
    pub fn from_config(models: &[ModelConfig], processors: &ProcessorRegistry) -> Self {
        let mut all = Vec::with_capacity(models.len());
        let mut by_key: HashMap<String, Vec<Arc<ModelPool>>> = HashMap::new();

        for cfg in models {
            let pool = Arc::new(ModelPool::new(cfg.clone(), processors));
            by_key
                .entry(cfg.model_name.clone())
                .or_default()
                .push(Arc::clone(&pool));
            for tag in &cfg.tags {
                by_key
                    .entry(tag.clone())
                    .or_default()
                    .push(Arc::clone(&pool));
            }
            all.push(pool);
        }

        info!(
            pools = all.len(),
            keys = by_key.len(),
            "model pools initialised"
        );
        Self { by_key, all }
    }

    /// The first configured pool, which serves requests without a model tag.
    pub fn default_pool(&self) -> Option<Arc<ModelPool>> {
        self.all.first().cloned()
    }

    /// Pick the least-loaded pool serving `tag`. Unknown tags fall back to
    /// scanning every pool; ties resolve to configuration order.
    pub fn select_idlest(&self, tag: &str) -> Option<Arc<ModelPool>> {
        if tag.is_empty() {
            return self.default_pool();
        }
        let candidates = self
            .by_key
            .get(tag)
            .map(|pools| pools.as_slice())
            .unwrap_or(&self.all);

        let mut best: Option<&Arc<ModelPool>> = None;
        for pool in candidates {
            match best {
                None => best = Some(pool),
                Some(current) if pool.load_ratio() < current.load_ratio() => best = Some(pool),
                Some(_) => {}
            }
        }
        best.cloned()
    }

    pub fn pools(&self) -> &[Arc<ModelPool>] {
        &self.all
    }

    pub fn snapshot(&self) -> Vec<PoolSnapshot> {
        self.all.iter().map(|pool| pool.snapshot()).collect()
    }

    pub fn model_summaries(&self) -> Vec<ModelSummary> {
        self.all
            .iter()
            .map(|pool| {
                let cfg = pool.config();
                ModelSummary {
                    model_name: cfg.model_name.clone(),
                    tags: cfg.tags.clone(),
                    fim_mode: cfg.fim_mode,
                    max_prefix_context: cfg.max_prefix_context,
                    max_suffix_context: cfg.max_suffix_context,
                    max_output_token: cfg.max_output_token,
                    max_concurrent: cfg.max_concurrent,
                }
            })
            .collect()
    }
}
