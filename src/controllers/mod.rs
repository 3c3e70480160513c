use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::providers::StaticImageProvider;

pub mod nodepool;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconciler
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,

    /// If set, only NodePools in this namespace are reconciled
    watch_namespace: Option<String>,
    /// Upper bound on reconciles running at once
    concurrency: u16,
    /// Worker AMIs by region
    images: StaticImageProvider,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(
        watch_namespace: Option<String>,
        concurrency: u16,
        images: StaticImageProvider,
    ) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            watch_namespace,
            concurrency,
            images,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}
