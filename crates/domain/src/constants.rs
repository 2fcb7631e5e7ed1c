//! Domain constants
//!
//! Centralized location for all domain-level constants used by the REST
//! runtime and its consumers.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::types::ApiEndpoint;

/// Logical API hostname, sent as the `Host` header on every request.
pub const API_HOSTNAME: &str = "api.veilnet.net";

/// Built-in fallback endpoint used when neither the on-disk cache nor the
/// bundled seed can be read.
pub const DEFAULT_API_ENDPOINT: ApiEndpoint =
    ApiEndpoint::new(IpAddr::V4(Ipv4Addr::new(45, 83, 223, 196)), 443);

/// Default per-request network timeout enforced by the transport.
pub const API_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between successful address cache refreshes.
pub const ADDRESS_CACHE_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry interval after a failed address cache refresh.
pub const ADDRESS_CACHE_RETRY_INTERVAL: Duration = Duration::from_secs(15 * 60);

// URL prefixes per service
pub const ACCOUNTS_URL_PREFIX: &str = "/accounts/v1";
pub const AUTH_URL_PREFIX: &str = "/auth/v1";
pub const APP_URL_PREFIX: &str = "/app/v1";
