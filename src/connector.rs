//! Connector capability traits and the kind registry.
//!
//! A [`Connector`] knows how to open backend handles for one data-source
//! kind; a [`Handle`] is one live backend connection, owned exclusively by
//! a single request while checked out of the pool. The dispatcher resolves
//! kinds through a [`ConnectorRegistry`] lookup table, so adding a backend
//! kind is a closed, testable extension.

use crate::error::Result;
use crate::types::{NativeResult, Params, QueryRequest, SourceKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One live backend connection. Checkout is exclusive, so methods take
/// `&mut self`; a handle is never shared between concurrent requests.
#[async_trait]
pub trait Handle: Send {
    /// Execute one query with bound parameters.
    async fn run(&mut self, query: &str, params: &Params) -> Result<NativeResult>;

    /// Cheap liveness probe used when reusing an idle handle.
    async fn is_valid(&mut self) -> bool;

    /// Close the underlying backend connection.
    async fn close(&mut self) -> Result<()>;
}

/// Backend driver for one data-source kind.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Kind this connector serves.
    fn kind(&self) -> SourceKind;

    /// Validate request text before any handle is acquired. Runs ahead of
    /// pool checkout so rejected requests touch no backend state.
    fn check(&self, request: &QueryRequest) -> Result<()> {
        let _ = request;
        Ok(())
    }

    /// Open a new backend handle.
    async fn connect(&self) -> Result<Box<dyn Handle>>;
}

/// Lookup table from data-source kind to connector.
#[derive(Default)]
pub struct ConnectorRegistry {
    entries: HashMap<SourceKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under its own kind, replacing any previous one.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let kind = connector.kind();
        tracing::debug!(%kind, "registering connector");
        self.entries.insert(kind, connector);
    }

    /// Look up the connector for a kind.
    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Connector>> {
        self.entries.get(&kind).cloned()
    }

    /// Whether a kind has a registered connector.
    pub fn contains(&self, kind: SourceKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered kinds, in no particular order.
    pub fn kinds(&self) -> Vec<SourceKind> {
        self.entries.keys().copied().collect()
    }

    /// Number of registered connectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
