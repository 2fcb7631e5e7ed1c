//! Authorization and access-token types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::AccountNumber;

/// A value identifying the caller to the API.
///
/// Rendered into the `Authorization` header as `Token <account-number>` for
/// legacy endpoints and `Bearer <access-token>` for session tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    AccountCredential(AccountNumber),
    BearerToken(String),
}

impl Authorization {
    /// The full `Authorization` header value.
    pub fn header_value(&self) -> String {
        match self {
            Self::AccountCredential(account) => format!("Token {account}"),
            Self::BearerToken(token) => format!("Bearer {token}"),
        }
    }
}

/// Response body of the token obtain and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenData {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}
