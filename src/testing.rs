//! In-memory mock connector for driving the dispatcher and pool in tests
//! without live backends.
//!
//! The mock records connect/run/close activity in shared atomic counters,
//! so tests can assert pool bounds, retry counts and discard behavior.

use crate::connector::{Connector, Handle};
use crate::error::{Error, Result};
use crate::types::{NativeResult, Params, Row, SourceKind};
use async_trait::async_trait;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    runs: AtomicUsize,
    closes: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    remaining_transient_failures: AtomicUsize,
    connect_outage: AtomicBool,
}

impl MockState {
    fn take_transient_failure(&self) -> bool {
        self.remaining_transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Scripted connector serving a fixed result, with optional failures and
/// latency.
pub struct MockConnector {
    kind: SourceKind,
    state: Arc<MockState>,
    result: NativeResult,
    run_delay: Option<Duration>,
    permanent_error: Option<String>,
}

impl MockConnector {
    /// Mock serving an empty result for the given kind.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            state: Arc::new(MockState::default()),
            result: NativeResult::default(),
            run_delay: None,
            permanent_error: None,
        }
    }

    /// Serve the given native result on every run.
    pub fn with_result(mut self, result: NativeResult) -> Self {
        self.result = result;
        self
    }

    /// Serve the given rows on every run.
    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.result = NativeResult::rows(rows);
        self
    }

    /// Sleep this long inside every run, to exercise timeouts and
    /// concurrency bounds.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    /// Fail the first `count` runs with a transient error, then succeed.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.state
            .remaining_transient_failures
            .store(count, Ordering::SeqCst);
        self
    }

    /// Fail every run with a permanent error.
    pub fn failing_permanently(mut self, message: impl Into<String>) -> Self {
        self.permanent_error = Some(message.into());
        self
    }

    /// Fail every connect attempt, simulating a backend outage.
    pub fn with_connect_outage(self) -> Self {
        self.state.connect_outage.store(true, Ordering::SeqCst);
        self
    }

    /// Restore connectivity after [`with_connect_outage`](Self::with_connect_outage).
    pub fn end_connect_outage(&self) {
        self.state.connect_outage.store(false, Ordering::SeqCst);
    }

    /// Connect attempts so far.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Queries run so far.
    pub fn runs(&self) -> usize {
        self.state.runs.load(Ordering::SeqCst)
    }

    /// Handles closed so far.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Most handles ever open at once.
    pub fn peak_open(&self) -> usize {
        self.state.peak_open.load(Ordering::SeqCst)
    }

    /// Most queries ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn connect(&self) -> Result<Box<dyn Handle>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.connect_outage.load(Ordering::SeqCst) {
            return Err(Error::transient("backend unreachable"));
        }
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            result: self.result.clone(),
            run_delay: self.run_delay,
            permanent_error: self.permanent_error.clone(),
        }))
    }
}

struct MockHandle {
    state: Arc<MockState>,
    result: NativeResult,
    run_delay: Option<Duration>,
    permanent_error: Option<String>,
}

struct InFlight(Arc<MockState>);

impl InFlight {
    fn enter(state: &Arc<MockState>) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(Arc::clone(state))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Handle for MockHandle {
    async fn run(&mut self, _query: &str, _params: &Params) -> Result<NativeResult> {
        self.state.runs.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.state);
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.permanent_error {
            return Err(Error::permanent(message.clone()));
        }
        if self.state.take_transient_failure() {
            return Err(Error::transient("scripted transient failure"));
        }
        Ok(self.result.clone())
    }

    async fn is_valid(&mut self) -> bool {
        true
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rows from a JSON array of objects, for concise test setup.
pub fn rows_from_json(value: Json) -> Vec<Row> {
    match value {
        Json::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Json::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
