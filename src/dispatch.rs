//! The dispatcher: request validation, routing, timeout and retry policy.
//!
//! [`Dispatcher::execute`] is the engine's single entry point. It never
//! fails with a fault: every error path is recovered and surfaced as a
//! [`QueryResult`] with `success: false`, so upstream handlers always hold
//! a well-formed value.

use crate::config::{EngineConfig, SqlFlavor};
use crate::connector::{Connector, ConnectorRegistry};
use crate::error::{Error, Result};
use crate::normalize::normalize;
use crate::pool::{PoolKey, PoolManager, PoolOptions, PoolStats};
use crate::retry::{retry, RetryPolicy};
use crate::security::validate_param_name;
use crate::types::{QueryRequest, QueryResult, ResultMetadata, SourceKind, Table};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use validator::Validate;

/// Builder assembling a [`Dispatcher`] from configuration and connectors.
pub struct DispatcherBuilder {
    config: EngineConfig,
    connectors: Vec<Arc<dyn Connector>>,
}

impl DispatcherBuilder {
    /// Builder for the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            connectors: Vec::new(),
        }
    }

    /// Register an explicit connector, overriding any configuration-derived
    /// connector of the same kind.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Validate the configuration and assemble the dispatcher.
    pub fn build(self) -> Result<Dispatcher> {
        self.config
            .validate()
            .map_err(|e| Error::validation(format!("invalid engine configuration: {e}")))?;

        let mut registry = ConnectorRegistry::new();

        #[cfg(feature = "postgres")]
        {
            if let Some(settings) = &self.config.backends.postgres {
                registry.register(Arc::new(crate::postgres::PostgresConnector::new(
                    settings.clone(),
                    self.config.statement_policy,
                )));
            }
        }
        #[cfg(feature = "mysql")]
        {
            if let Some(settings) = &self.config.backends.mysql {
                registry.register(Arc::new(crate::mysql::MySqlConnector::new(
                    settings.clone(),
                    self.config.statement_policy,
                )));
            }
        }
        if let Some(settings) = &self.config.backends.document {
            registry.register(Arc::new(crate::document::DocumentConnector::new(
                settings.clone(),
            )?));
        }
        registry.register(Arc::new(crate::http::HttpApiConnector::new(
            self.config.backends.http.clone(),
        )?));

        for connector in self.connectors {
            registry.register(connector);
        }

        let pools = Arc::new(PoolManager::new(PoolOptions::from(&self.config)));
        let sweeper = self
            .config
            .idle_eviction_period()
            .map(|period| PoolManager::start_sweeper(&pools, period));

        Ok(Dispatcher {
            config: self.config,
            registry,
            pools,
            sweeper,
        })
    }
}

/// Routes each [`QueryRequest`] to its connector and pool, enforcing the
/// request deadline and transient-failure retry policy.
pub struct Dispatcher {
    config: EngineConfig,
    registry: ConnectorRegistry,
    pools: Arc<PoolManager>,
    sweeper: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Dispatcher with connectors derived from configuration alone.
    pub fn new(config: EngineConfig) -> Result<Self> {
        DispatcherBuilder::new(config).build()
    }

    /// Builder for adding explicit connectors.
    pub fn builder(config: EngineConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Execute one request end to end.
    ///
    /// Always returns a well-formed result: exactly one of `data` / `error`
    /// is populated, and the request is echoed in `metadata`.
    pub async fn execute(&self, request: QueryRequest) -> QueryResult {
        let metadata = ResultMetadata::from(&request);
        match self.try_execute(&request).await {
            Ok((table, elapsed_ms)) => {
                tracing::debug!(
                    kind = %request.source,
                    rows = table.rows.len(),
                    elapsed_ms,
                    "query succeeded"
                );
                QueryResult::ok(table, elapsed_ms, metadata)
            }
            Err(error) => {
                tracing::debug!(kind = %request.source, category = %error.category(), %error,
                    "query failed");
                QueryResult::fail(&error, metadata)
            }
        }
    }

    async fn try_execute(&self, request: &QueryRequest) -> Result<(Table, u64)> {
        validate_request(request)?;

        let kind = self.resolve_kind(request.source);
        let connector = self.registry.get(kind).ok_or_else(|| {
            Error::validation(format!(
                "no connector registered for data source '{}'",
                request.source
            ))
        })?;
        connector.check(request)?;

        let started = Instant::now();
        let deadline = self.config.request_timeout();
        let key = PoolKey::new(request.tenant_id.as_deref(), kind);
        let policy = RetryPolicy {
            max_retries: self.config.retry_count,
            backoff: self.config.retry_backoff(),
        };

        let attempt_loop = retry(&policy, |attempt| {
            let connector = Arc::clone(&connector);
            let key = key.clone();
            async move {
                if attempt > 0 {
                    tracing::debug!(attempt, key = %key, "reissuing on a fresh connection");
                }
                let mut guard = self.pools.acquire(&key, connector, deadline).await?;
                match guard.run(&request.query, &request.params).await {
                    Ok(native) => {
                        guard.release().await;
                        Ok(native)
                    }
                    Err(error) => {
                        // The handle's state is uncertain after any failure.
                        guard.discard().await;
                        Err(error)
                    }
                }
            }
        });

        let native = match tokio::time::timeout(deadline, attempt_loop).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(Error::timeout(format!(
                    "request exceeded {}ms deadline",
                    self.config.request_timeout_ms
                )))
            }
        };

        let table = normalize(native);
        Ok((table, started.elapsed().as_millis() as u64))
    }

    /// Map the generic `sql` kind onto the configured relational flavor.
    fn resolve_kind(&self, source: SourceKind) -> SourceKind {
        match source {
            SourceKind::Sql => match self.config.backends.sql_flavor {
                SqlFlavor::Postgres => SourceKind::Postgres,
                SqlFlavor::MySql => SourceKind::MySql,
            },
            other => other,
        }
    }

    /// Kinds with a registered connector.
    pub fn registered_kinds(&self) -> Vec<SourceKind> {
        self.registry.kinds()
    }

    /// Statistics for one pool partition, if it has been created.
    pub async fn pool_stats(&self, tenant: Option<&str>, kind: SourceKind) -> Option<PoolStats> {
        let key = PoolKey::new(tenant, self.resolve_kind(kind));
        self.pools.stats(&key).await
    }

    /// Number of pool partitions created so far.
    pub async fn pool_count(&self) -> usize {
        self.pools.pool_count().await
    }

    /// Stop the eviction sweep and close every pooled handle.
    pub async fn shutdown(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
        self.pools.shutdown().await;
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.registry.kinds())
            .field("max_pool_size_per_key", &self.config.max_pool_size_per_key)
            .field("request_timeout_ms", &self.config.request_timeout_ms)
            .finish()
    }
}

fn validate_request(request: &QueryRequest) -> Result<()> {
    if request.query.trim().is_empty() {
        return Err(Error::validation("query cannot be empty"));
    }
    for name in request.params.names() {
        validate_param_name(name)?;
    }
    Ok(())
}
