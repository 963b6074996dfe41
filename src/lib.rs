//! # querymux
//!
//! Multi-source query dispatch engine: accepts a [`QueryRequest`] tagged
//! with a data-source kind, routes it to the matching backend connector,
//! executes it under pooling, timeout and retry policy, and returns a
//! normalized tabular [`QueryResult`].
//!
//! ## Features
//!
//! - **Polymorphic connectors**: PostgreSQL, MySQL, document-store and
//!   HTTP-API backends behind one capability trait
//! - **Per-tenant pooling**: bounded handle pools partitioned by
//!   (tenant, kind) with lazy creation and idle eviction
//! - **Failure normalization**: every error surfaces as a well-formed
//!   failed result, classified transient or permanent
//! - **Bounded retry**: transient failures retried on fresh connections
//!   with linear backoff, all inside the request deadline
//! - **Injection safety**: parameters bind through each backend's native
//!   mechanism, never string interpolation
//!
//! ## Example
//!
//! ```no_run
//! use querymux::prelude::*;
//!
//! # async fn example() -> querymux::Result<()> {
//! let config = EngineConfig::default().with_backends(
//!     BackendSettings {
//!         postgres: Some(SqlBackend::new("postgres://app@db/reports")),
//!         ..Default::default()
//!     },
//! );
//! let dispatcher = Dispatcher::new(config)?;
//!
//! let request = QueryRequest::new(
//!     SourceKind::Postgres,
//!     "SELECT branch, avg_cost FROM costs WHERE tenant = :t",
//! )
//! .with_param("t", "vpi-co-ltd")
//! .with_tenant("vpi-co-ltd");
//!
//! let result = dispatcher.execute(request).await;
//! assert!(result.success || result.error.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod http;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod normalize;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod retry;
pub mod security;
pub mod sql;
pub mod testing;
pub mod types;

pub use config::{
    BackendSettings, DocumentBackend, EngineConfig, HttpBackend, SqlBackend, SqlFlavor,
    StatementPolicy,
};
pub use connector::{Connector, ConnectorRegistry, Handle};
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use error::{Error, ErrorCategory, Result};
pub use normalize::normalize;
pub use pool::{BackendPool, PoolGuard, PoolKey, PoolManager, PoolOptions, PoolStats};
pub use types::{
    NativeResult, ParamValue, Params, QueryRequest, QueryResult, ResultMetadata, Row, SourceKind,
    Table,
};

/// Convenient re-exports of the engine surface.
pub mod prelude {
    pub use crate::config::{
        BackendSettings, DocumentBackend, EngineConfig, HttpBackend, SqlBackend, SqlFlavor,
        StatementPolicy,
    };
    pub use crate::connector::{Connector, ConnectorRegistry, Handle};
    pub use crate::dispatch::{Dispatcher, DispatcherBuilder};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::pool::{PoolKey, PoolManager, PoolOptions, PoolStats};
    pub use crate::retry::RetryPolicy;
    pub use crate::types::{
        NativeResult, ParamValue, Params, QueryRequest, QueryResult, ResultMetadata, Row,
        SourceKind, Table,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_exports() {
        let request = QueryRequest::new(SourceKind::HttpApi, "https://api/x");
        assert_eq!(request.source, SourceKind::HttpApi);
        let _config = EngineConfig::default();
        let _policy = RetryPolicy::default();
    }
}
