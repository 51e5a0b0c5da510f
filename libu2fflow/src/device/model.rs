use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::DeviceStatus;

pub const U2F_V2: &str = "U2F_V2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub version: String,
    pub challenge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredKey {
    pub version: String,
    pub key_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

impl RegisteredKey {
    pub fn new_u2f_v2(key_handle: &str) -> Self {
        Self {
            version: U2F_V2.to_owned(),
            key_handle: key_handle.to_owned(),
            app_id: None,
            transports: None,
        }
    }
}

/// Enrollment data issued by the relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationChallenge {
    pub app_id: String,
    pub register_requests: Vec<RegisterRequest>,
    #[serde(default)]
    pub registered_keys: Vec<RegisteredKey>,
}

/// Authentication data issued by the relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignChallenge {
    pub app_id: String,
    pub challenge: String,
    #[serde(default)]
    pub registered_keys: Vec<RegisteredKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub version: String,
    pub registration_data: String,
    pub client_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResponse {
    pub key_handle: String,
    pub signature_data: String,
    pub client_data: String,
}

/// Client data the token hashes into the challenge parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub typ: String,
    pub challenge: String,
    pub origin: String,
}

impl ClientData {
    pub const FINISH_ENROLLMENT: &'static str = "navigator.id.finishEnrollment";
    pub const GET_ASSERTION: &'static str = "navigator.id.getAssertion";
}

/// Result of one interaction with the token. `payload` is only set on success.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOutcome {
    pub status: u32,
    pub payload: Option<Value>,
}

impl DeviceOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            status: DeviceStatus::Ok.into(),
            payload: Some(payload),
        }
    }

    pub fn failure(status: DeviceStatus) -> Self {
        Self {
            status: status.into(),
            payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == u32::from(DeviceStatus::Ok)
    }
}
