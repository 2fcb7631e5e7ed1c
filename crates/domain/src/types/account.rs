//! Account types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An opaque account number identifying a paying customer.
///
/// The `Debug` impl redacts all but the leading digits so that account
/// numbers never end up in logs verbatim; use `as_str`/`Display` only where
/// the full value is genuinely needed (e.g. the `Authorization` header).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountNumber(")?;
        for c in self.0.chars().take(4) {
            write!(f, "{c}")?;
        }
        write!(f, "****)")
    }
}

impl From<String> for AccountNumber {
    fn from(number: String) -> Self {
        Self(number)
    }
}

impl From<&str> for AccountNumber {
    fn from(number: &str) -> Self {
        Self(number.to_owned())
    }
}

/// Account state as reported by `GET /accounts/v1/accounts/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    pub id: String,
    pub expiry: DateTime<Utc>,
    pub max_devices: u32,
}

/// A freshly created account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub number: AccountNumber,
    pub expiry: DateTime<Utc>,
}

/// Result of redeeming a voucher code against an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherSubmission {
    /// Seconds of paid time the voucher added.
    pub time_added: u64,
    pub new_expiry: DateTime<Utc>,
}
