use std::collections::btree_map::Entry;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, trace};

use digger_extract::{ExtractionStrategy, FieldExtractor};
use digger_types::{normalize_operation_name, OperationEntry, OperationRecord, OriginSchema, Registry};

pub mod infer;
pub use infer::{describe, fold_response};

pub mod snapshot;
pub use snapshot::SnapshotError;

/// Bounds on response type inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceLimits {
    /// Object nesting below `data` beyond which keys are ignored.
    pub max_depth: usize,
    /// Characters kept from a scalar sample.
    pub sample_chars: usize,
}

impl Default for InferenceLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            sample_chars: 50,
        }
    }
}

/// Per-origin running schema, built from classified operations.
///
/// Purpose: the only shared mutable state of the digger. Every sighting is
/// applied under one lock acquisition, so counts and timestamps of a key never
/// interleave with a concurrent sighting of the same key.
///
/// NOTE: in-memory only; see [`snapshot`] for an optional file copy.
pub struct SchemaAggregator {
    extractor: Box<dyn FieldExtractor>,
    limits: InferenceLimits,
    origins: Mutex<Registry>,
}

impl Default for SchemaAggregator {
    fn default() -> Self {
        Self::new(ExtractionStrategy::default(), InferenceLimits::default())
    }
}

impl SchemaAggregator {
    pub fn new(extractor: impl FieldExtractor + 'static, limits: InferenceLimits) -> Self {
        Self {
            extractor: Box::new(extractor),
            limits,
            origins: Mutex::new(Registry::new()),
        }
    }

    pub fn with_strategy(strategy: ExtractionStrategy) -> Self {
        Self::new(strategy, InferenceLimits::default())
    }

    // Every mutation leaves the map consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.origins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge one classified operation (and optionally its response) into `origin`.
    pub fn record(&self, origin: &str, record: &OperationRecord, response: Option<&Value>) {
        self.record_at(origin, None, record, response, Utc::now());
    }

    /// [`SchemaAggregator::record`] with the endpoint it was seen on and an explicit clock.
    pub fn record_at(
        &self,
        origin: &str,
        endpoint: Option<&str>,
        record: &OperationRecord,
        response: Option<&Value>,
        now: DateTime<Utc>,
    ) {
        let name = normalize_operation_name(&record.operation_name);
        let mut origins = self.lock();
        let schema = origins
            .entry(origin.to_string())
            .or_insert_with(|| OriginSchema::new(now));
        schema.request_count += 1;
        if let Some(endpoint) = endpoint {
            schema.endpoints.insert(endpoint.to_string());
        }

        let entry = match schema.bucket_mut(record.operation_type).entry(name.to_string()) {
            Entry::Occupied(existing) => existing.into_mut(),
            Entry::Vacant(slot) => {
                let fields = self.extractor.extract(&record.query_text);
                info!(
                    origin,
                    operation = name,
                    kind = %record.operation_type,
                    fields = fields.len(),
                    "new operation"
                );
                slot.insert(OperationEntry::new(fields, record.variables.clone(), now))
            }
        };
        entry.observe(record.variables.clone(), now);
        trace!(origin, operation = name, count = entry.count, "sighting");

        if let Some(payload) = response {
            fold_response(&mut schema.types, payload, &self.limits);
        }
    }

    /// Snapshot of one origin; an empty placeholder when it was never observed.
    pub fn get_schema(&self, origin: &str) -> OriginSchema {
        self.lock().get(origin).cloned().unwrap_or_default()
    }

    /// Snapshot of every origin.
    pub fn registry(&self) -> Registry {
        self.lock().clone()
    }

    pub fn list_origins(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Drop one origin, or everything when `origin` is `None`. Missing origins are fine.
    pub fn reset(&self, origin: Option<&str>) {
        let mut origins = self.lock();
        match origin {
            Some(origin) => {
                origins.remove(origin);
            }
            None => origins.clear(),
        }
    }

    /// Replace all state with a previously saved registry.
    pub fn restore(&self, registry: Registry) {
        *self.lock() = registry;
    }
}
