//! Wire transport for the remote signal node databases.
//!
//! Both `cam_db` and `signal_db` speak the same minimal protocol: a query is POSTed as JSON
//! (`{"query": "<sql>"}`) to `http://<host>:<port>/query`, and the response is a row-oriented
//! envelope (`{"status": 1, "results": [{"data": [[...], ...]}]}`). `status != 1` or an empty
//! `data` array both mean "no rows" rather than a transport failure.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{NodeError, NodeResult};

/// One result set in a [`QueryResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
    /// Row-major result data; each inner vec is one row's columns.
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

/// Envelope returned by a query endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    /// `1` on success, anything else indicates no data (not necessarily an error).
    pub status: i32,
    /// Result sets, one per statement in the query (this node only ever sends one).
    #[serde(default)]
    pub results: Vec<QueryResult>,
}

impl QueryResponse {
    /// The first row of the first result set, if the response reports success and has rows.
    pub fn first_row(&self) -> Option<&[Value]> {
        if self.status != 1 {
            return None;
        }
        self.results.first().and_then(|r| r.data.first()).map(Vec::as_slice)
    }
}

/// Abstraction over "send this SQL string to this host:port, get a [`QueryResponse`] back".
///
/// Kept behind a trait so tests can substitute an in-memory fake instead of binding a real
/// socket, and so the transport can be swapped without touching reconnect/retry logic.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Execute `query` against `host:port` and parse the response envelope.
    async fn query(&self, host: &str, port: u16, query: &str) -> NodeResult<QueryResponse>;
}

/// JSON-over-HTTP implementation of [`QueryTransport`].
pub struct HttpQueryTransport {
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl HttpQueryTransport {
    /// Build a transport with the given per-request timeout.
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpQueryTransport {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(5))
    }
}

#[async_trait]
impl QueryTransport for HttpQueryTransport {
    async fn query(&self, host: &str, port: u16, query: &str) -> NodeResult<QueryResponse> {
        let url = format!("http://{host}:{port}/query");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "query": query }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NodeError::DbUnavailable(e.to_string()))?;

        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| NodeError::QueryFailed(e.to_string()))
    }
}
