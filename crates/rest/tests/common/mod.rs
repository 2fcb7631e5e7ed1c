//! Shared fixtures for the end-to-end scenarios.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tempfile::TempDir;
use veilnet_rest::{
    AddressCache, ApiConfig, ApiContext, RestRequest, RestResponse, RestTransport, TransportError,
    TransportErrorCode,
};

pub const ENDPOINT_A: &str = "10.0.0.1:443";
pub const ENDPOINT_B: &str = "10.0.0.2:443";
pub const ENDPOINT_C: &str = "10.0.0.3:443";

/// Writes a cache file with a fixed endpoint order so tests bypass the
/// bootstrap shuffle.
pub fn write_cache_file(dir: &TempDir, endpoints: &[&str], updated_at: &str) {
    let config = ApiConfig::new(dir.path(), dir.path().join("bundled-endpoints.json"));
    let endpoints: Vec<serde_json::Value> = endpoints
        .iter()
        .map(|literal| {
            let addr: std::net::SocketAddr = literal.parse().unwrap();
            serde_json::json!({ "ip": addr.ip().to_string(), "port": addr.port() })
        })
        .collect();
    let json = serde_json::json!({ "updatedAt": updated_at, "endpoints": endpoints });
    std::fs::write(config.cache_file_path(), serde_json::to_vec_pretty(&json).unwrap()).unwrap();
}

/// A context whose cache was seeded from `endpoints` in order.
pub fn context_with_endpoints(
    dir: &TempDir,
    transport: Arc<dyn RestTransport>,
    endpoints: &[&str],
) -> ApiContext {
    write_cache_file(dir, endpoints, "2026-01-01T00:00:00Z");
    let config = ApiConfig::new(dir.path(), dir.path().join("bundled-endpoints.json"));
    let cache = Arc::new(AddressCache::open_with_rng(
        config.cache_file_path(),
        &config.bundled_addresses_path,
        config.default_endpoint,
        StdRng::seed_from_u64(11),
    ));
    ApiContext::with_address_cache(config, transport, cache)
}

pub enum Script {
    Respond(StatusCode, &'static str),
    RespondWithHeader(StatusCode, &'static str, (&'static str, &'static str)),
    Fail(TransportErrorCode),
}

/// Transport that replays a script of responses and records every request.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RestRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn request(&self, index: usize) -> RestRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn endpoints_seen(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.endpoint.to_string()).collect()
    }
}

#[async_trait]
impl RestTransport for ScriptedTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(Script::Respond(status, body)) => Ok(RestResponse {
                status,
                headers: HeaderMap::new(),
                body: body.as_bytes().to_vec(),
            }),
            Some(Script::RespondWithHeader(status, body, (name, value))) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static(name),
                    value.parse().unwrap(),
                );
                Ok(RestResponse { status, headers, body: body.as_bytes().to_vec() })
            }
            Some(Script::Fail(code)) => Err(TransportError::new(code, "scripted failure")),
            None => Err(TransportError::new(TransportErrorCode::Other, "script exhausted")),
        }
    }
}
