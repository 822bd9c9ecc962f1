//! Idempotent admission filter.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use super::store::{FileStore, IdempotentStore};
use crate::config::{IdSource, IdempotentConfig};
use crate::error::{CorrelationError, Result};
use crate::events::Event;
use crate::telemetry::AdmissionMetrics;

type ExtractFn<P> = dyn Fn(&Event<P>) -> Result<Option<String>> + Send + Sync;

/// Derives the unique id an event is deduplicated on.
pub struct IdExtractor<P> {
    name: &'static str,
    extract: Arc<ExtractFn<P>>,
}

impl<P> Clone for IdExtractor<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<P> std::fmt::Debug for IdExtractor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdExtractor").field("name", &self.name).finish()
    }
}

impl<P: 'static> IdExtractor<P> {
    /// Custom extractor. Returning `Ok(None)` means the event carries no id.
    pub fn new<F>(name: &'static str, extract: F) -> Self
    where
        F: Fn(&Event<P>) -> Result<Option<String>> + Send + Sync + 'static,
    {
        Self {
            name,
            extract: Arc::new(extract),
        }
    }

    /// The transport-supplied unique id.
    pub fn unique_id() -> Self {
        Self::new("unique_id", |event| Ok(event.unique_id().map(str::to_string)))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn extract(&self, event: &Event<P>) -> Result<Option<String>> {
        (self.extract)(event)
    }
}

impl<P: Serialize + 'static> IdExtractor<P> {
    /// Hex SHA-256 of the JSON-serialized payload, for transports without
    /// unique ids. Events with equal payloads are duplicates.
    pub fn secure_hash() -> Self {
        Self::new("secure_hash", |event| {
            let bytes = serde_json::to_vec(event.payload())?;
            Ok(Some(hex::encode(Sha256::digest(&bytes))))
        })
    }

    /// Extractor selected by configuration.
    pub fn from_source(source: IdSource) -> Self {
        match source {
            IdSource::UniqueId => Self::unique_id(),
            IdSource::SecureHash => Self::secure_hash(),
        }
    }
}

/// Admits each unique id once per consumer identity, across restarts when
/// backed by a persistent store.
pub struct IdempotentFilter<P> {
    consumer: String,
    store: Arc<dyn IdempotentStore>,
    extractor: IdExtractor<P>,
}

impl<P: 'static> IdempotentFilter<P> {
    pub fn new(
        consumer: impl Into<String>,
        store: Arc<dyn IdempotentStore>,
        extractor: IdExtractor<P>,
    ) -> Self {
        Self {
            consumer: consumer.into(),
            store,
            extractor,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn store(&self) -> &Arc<dyn IdempotentStore> {
        &self.store
    }

    /// Whether `event` should proceed.
    ///
    /// `Ok(true)` the first time an id is seen (the id is recorded before
    /// returning), `Ok(false)` for every later event with the same id. An
    /// event the extractor cannot key is a configuration error, never a
    /// silent pass.
    pub fn is_match(&self, event: &Event<P>) -> Result<bool> {
        let id = self.extractor.extract(event)?.ok_or_else(|| {
            let err = CorrelationError::filter_misconfigured(format!(
                "Event {} has no id for the '{}' extractor",
                event.id(),
                self.extractor.name()
            ))
            .with_context("consumer", &self.consumer);
            err.log();
            err
        })?;

        if self.store.insert_if_absent(&id)? {
            AdmissionMetrics::accepted(&self.consumer);
            Ok(true)
        } else {
            debug!(
                consumer = %self.consumer,
                unique_id = %id,
                event_id = %event.id(),
                "Duplicate event rejected"
            );
            AdmissionMetrics::duplicate(&self.consumer);
            Ok(false)
        }
    }
}

impl<P: Serialize + 'static> IdempotentFilter<P> {
    /// File-backed filter for the configured consumer.
    pub fn from_config(config: &IdempotentConfig) -> Self {
        let store = FileStore::new(&config.store_dir, &config.consumer);
        Self::new(
            config.consumer.clone(),
            Arc::new(store),
            IdExtractor::from_source(config.id_source),
        )
    }
}
