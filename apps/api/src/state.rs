use std::sync::Arc;

use crate::cache::CacheStore;
use crate::generation::orchestrator::Orchestrator;
use crate::history::HistoryStore;
use crate::intake::admission::AdmissionController;
use crate::metrics::ReviewMetrics;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub admission: AdmissionController,
    pub orchestrator: Arc<Orchestrator>,
    /// Same store the orchestrator writes to; exposed for the stats endpoint.
    pub cache: Arc<dyn CacheStore>,
    /// Same store the orchestrator appends to; read by the history endpoints.
    pub history: Arc<dyn HistoryStore>,
    /// Shared with the orchestrator, which records run and provider outcomes.
    pub metrics: Arc<ReviewMetrics>,
}
