//! HTTP transport implementation.
//!
//! Request and response bodies are CBOR. The actual HTTP client is
//! abstracted via a trait so the engine does not pick an HTTP library.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteService;
use boxoffice_sync_protocol::{
    decode, encode, ErrorBody, GetTicketRequest, ListSoldItemsRequest, ListSoldItemsResponse, Rpc,
    ScanVerdict, SubmitPurchasesRequest, SubmitPurchasesResponse, SubmitScanRequest, TicketRecord,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A request that produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// No response within the timeout.
    Timeout,
    /// The connection could not be made or was dropped.
    Connect(String),
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a CBOR body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration)
        -> Result<HttpResponse, HttpFailure>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based remote service.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the service (e.g., "https://boxoffice.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Request timeout.
    timeout: Duration,
    /// Whether the last request reached the service.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(15),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport using the request timeout of `config`.
    pub fn from_config(base_url: impl Into<String>, client: C, config: &SyncConfig) -> Self {
        Self::new(base_url, client).with_timeout(config.timeout)
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: impl Into<String>) {
        *self.last_error.write() = Some(err.into());
    }

    fn post_rpc<R: Rpc>(&self, request: &R) -> SyncResult<R::Response> {
        if !self.client.is_healthy() {
            return Err(SyncError::NotConnected);
        }

        let body = encode(request)?;
        let url = format!("{}{}", self.base_url, R::PATH);

        let response = match self.client.post(&url, body, self.timeout) {
            Ok(response) => response,
            Err(failure) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(match failure {
                    HttpFailure::Timeout => {
                        self.set_error("request timed out");
                        SyncError::Timeout
                    }
                    HttpFailure::Connect(message) => {
                        self.set_error(message.clone());
                        SyncError::transport_retryable(message)
                    }
                });
            }
        };

        self.connected.store(true, Ordering::SeqCst);

        if !response.is_success() {
            let message = decode::<ErrorBody>(&response.body)
                .map(|b| b.message)
                .unwrap_or_default();
            self.set_error(format!("{} {}", response.status, message));
            return Err(SyncError::server(response.status, message));
        }

        *self.last_error.write() = None;
        Ok(decode(&response.body)?)
    }
}

impl<C: HttpClient> RemoteService for HttpTransport<C> {
    fn submit_purchases(
        &self,
        request: &SubmitPurchasesRequest,
    ) -> SyncResult<SubmitPurchasesResponse> {
        self.post_rpc(request)
    }

    fn list_sold_items(&self, request: &ListSoldItemsRequest) -> SyncResult<ListSoldItemsResponse> {
        self.post_rpc(request)
    }

    fn submit_scan(&self, request: &SubmitScanRequest) -> SyncResult<ScanVerdict> {
        self.post_rpc(request)
    }

    fn get_ticket(&self, request: &GetTicketRequest) -> SyncResult<TicketRecord> {
        self.post_rpc(request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}
