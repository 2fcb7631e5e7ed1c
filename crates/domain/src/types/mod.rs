//! Domain types and models

pub mod account;
pub mod device;
pub mod endpoint;
pub mod relay;
pub mod token;

pub use account::{AccountData, AccountNumber, NewAccount, VoucherSubmission};
pub use device::{Device, DeviceId, NewDevice};
pub use endpoint::ApiEndpoint;
pub use relay::{Relay, RelayCity, RelayCountry, RelayList};
pub use token::{AccessTokenData, Authorization};
