pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use http::HttpTransport;

use crate::device::{RegistrationChallenge, SignChallenge};
use crate::error::Error;

/// What the relying party reports after verifying a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub key_handle: String,
    pub touch: u8,
    pub counter: u32,
}

/// The relying party, as seen by the flows.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_registration_challenge(&self) -> Result<RegistrationChallenge, Error>;

    /// `data`, when present, is hashed by the relying party into the challenge.
    async fn fetch_sign_challenge(&self, data: Option<&str>) -> Result<SignChallenge, Error>;

    async fn confirm_registration(&self, response: &str) -> Result<Value, Error>;

    async fn verify_signature(&self, response: &str) -> Result<VerifyResult, Error>;
}
