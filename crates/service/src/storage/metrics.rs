use prometheus::{IntCounterVec, Opts, Registry};

/// Per-store counters, labelled by store key.
#[derive(Clone)]
pub struct StoreMetrics {
    pub mutations: IntCounterVec,
    pub flushes: IntCounterVec,
    pub flush_failures: IntCounterVec,
    pub corrupt_loads: IntCounterVec,
}

impl StoreMetrics {
    /// Create the counters and register them on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered()?;
        registry.register(Box::new(metrics.mutations.clone()))?;
        registry.register(Box::new(metrics.flushes.clone()))?;
        registry.register(Box::new(metrics.flush_failures.clone()))?;
        registry.register(Box::new(metrics.corrupt_loads.clone()))?;
        Ok(metrics)
    }

    /// Counters that are never exported.
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| IntCounterVec::new(Opts::new(name, help), &["store"]);
        Ok(Self {
            mutations: counter("store_mutations_total", "Mutations applied to cached documents")?,
            flushes: counter("store_flushes_total", "Successful durable writes")?,
            flush_failures: counter("store_flush_failures_total", "Failed durable writes")?,
            corrupt_loads: counter("store_corrupt_loads_total", "Records that failed to decode on load")?,
        })
    }
}
