use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::domain::Locator;
use crate::error::IngestError;

const CHUNK_SIZE: usize = 64 * 1024;
/// Upper bound for pre-allocation from a declared `Content-Length`.
const MAX_PREALLOC: usize = CHUNK_SIZE * 16;

/// Cooperative cancellation flag shared between the caller and a running fetch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

pub trait ResourceFetcher: Send + Sync {
    fn fetch(
        &self,
        locator: &Locator,
        cancel: &CancelToken,
    ) -> Result<FetchedResource, IngestError>;
}

/// Plain HTTP(S) retrieval. Failures are not retried.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self, IngestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("studylink/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IngestError::Retrieval(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| IngestError::Retrieval(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, IngestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "request failed".to_string());
        Err(IngestError::RetrievalStatus { status, message })
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(
        &self,
        locator: &Locator,
        cancel: &CancelToken,
    ) -> Result<FetchedResource, IngestError> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        info!(locator = %locator, "fetching resource");
        let start = Instant::now();
        let response = self
            .client
            .get(locator.as_str())
            .send()
            .map_err(|err| IngestError::Retrieval(err.to_string()))?;
        let response = Self::handle_status(response)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let capacity = response.content_length().unwrap_or(0) as usize;
        let bytes = read_cancellable(response, capacity, cancel)?;

        debug!(
            bytes = bytes.len(),
            content_type = content_type.as_deref().unwrap_or(""),
            latency_ms = start.elapsed().as_millis() as u64,
            "resource fetched"
        );
        Ok(FetchedResource {
            bytes,
            content_type,
        })
    }
}

/// Drains `reader` in chunks, checking `cancel` between chunks.
///
/// `capacity` is an untrusted hint and is capped before allocating.
pub fn read_cancellable<R: Read>(
    mut reader: R,
    capacity: usize,
    cancel: &CancelToken,
) -> Result<Vec<u8>, IngestError> {
    let mut bytes = Vec::with_capacity(capacity.min(MAX_PREALLOC));
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        let read = reader
            .read(&mut chunk)
            .map_err(|err| IngestError::Retrieval(err.to_string()))?;
        if read == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..read]);
    }
    Ok(bytes)
}
