pub mod client;
pub mod crypto;
pub mod error;
pub mod issuance;
pub mod quote;
pub mod redemption;
pub mod refund;

pub use client::RedemptionClient;
pub use crypto::{commitment_hex, commitment_of, random_secret};
pub use error::{Result, SdkError};
