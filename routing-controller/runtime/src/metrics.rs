use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    syncs: Family<SyncLabels, Counter>,
    sync_duration: Histogram,
    writes: Family<WriteLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SyncLabels {
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct WriteLabels {
    operation: &'static str,
    outcome: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SyncResult {
    Ok,
    Retry,
    Dropped,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ok,
    NotFound,
    Error,
}

fn sync_duration() -> Histogram {
    Histogram::new([0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let syncs = Family::<SyncLabels, Counter>::default();
        reg.register("syncs", "Count of completed syncs by result", syncs.clone());

        let sync_duration = sync_duration();
        reg.register_with_unit(
            "sync_duration",
            "Histogram of the time taken to sync a service",
            Unit::Seconds,
            sync_duration.clone(),
        );

        let writes = Family::<WriteLabels, Counter>::default();
        reg.register(
            "writes",
            "Count of VirtualService and Strategy writes by operation and outcome",
            writes.clone(),
        );

        Self {
            syncs,
            sync_duration,
            writes,
        }
    }

    pub(crate) fn sync_duration(&self, started: time::Instant) {
        self.sync_duration.observe(started.elapsed().as_secs_f64());
    }

    pub(crate) fn sync(&self, result: SyncResult) {
        self.syncs
            .get_or_create(&SyncLabels {
                result: result.as_str(),
            })
            .inc();
    }

    pub(crate) fn write(&self, operation: Operation, outcome: Outcome) {
        self.writes
            .get_or_create(&WriteLabels {
                operation: operation.as_str(),
                outcome: outcome.as_str(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn syncs(&self, result: SyncResult) -> u64 {
        self.syncs
            .get_or_create(&SyncLabels {
                result: result.as_str(),
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn writes(&self, operation: Operation, outcome: Outcome) -> u64 {
        self.writes
            .get_or_create(&WriteLabels {
                operation: operation.as_str(),
                outcome: outcome.as_str(),
            })
            .get()
    }
}

/// Unregistered metrics.
impl Default for ControllerMetrics {
    fn default() -> Self {
        Self {
            syncs: Default::default(),
            sync_duration: sync_duration(),
            writes: Default::default(),
        }
    }
}

// === impl SyncResult ===

impl SyncResult {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Retry => "retry",
            Self::Dropped => "dropped",
        }
    }
}

// === impl Operation ===

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

// === impl Outcome ===

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Error => "error",
        }
    }
}
