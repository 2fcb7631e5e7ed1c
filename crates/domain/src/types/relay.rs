//! Relay list types
//!
//! The relay list is served by `GET /app/v1/relays` and cached by callers
//! keyed on the response etag; the payload here is the decoded body only.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayList {
    pub countries: Vec<RelayCountry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCountry {
    pub name: String,
    pub code: String,
    pub cities: Vec<RelayCity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCity {
    pub name: String,
    pub code: String,
    pub relays: Vec<Relay>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relay {
    pub hostname: String,
    pub ipv4_addr_in: Ipv4Addr,
    pub public_key: String,
    pub active: bool,
    #[serde(default)]
    pub weight: u64,
}
