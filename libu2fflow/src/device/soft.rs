use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::model::U2F_V2;
use super::{
    ClientData, DeviceBackend, DeviceCallback, DeviceOutcome, RegisterRequest, RegisterResponse,
    RegisteredKey, SignResponse,
};
use crate::classify::DeviceStatus;
use crate::error::{Error, TransportError};

const REGISTER_RESERVED: u8 = 0x05;
const USER_PRESENT: u8 = 0x01;
const KEY_HANDLE_LEN: usize = 64;

/// How the simulated user reacts to a prompt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UserPresence {
    Immediate,
    After(Duration),
    Never,
}

struct Credential {
    app_param: Vec<u8>,
    key: SigningKey,
    counter: u32,
}

/// In-process U2F token producing raw U2F messages with P-256 keys.
///
/// Prompts other than [`UserPresence::Immediate`] are answered from a spawned
/// tokio task, so those require a running runtime.
#[derive(Clone)]
pub struct SoftToken {
    attestation_key: SigningKey,
    attestation_cert: Vec<u8>,
    credentials: Arc<Mutex<HashMap<Vec<u8>, Credential>>>,
    presence: UserPresence,
}

impl fmt::Debug for SoftToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftToken")
            .field("attestation_cert_len", &self.attestation_cert.len())
            .field("presence", &self.presence)
            .finish()
    }
}

impl SoftToken {
    pub fn new() -> Result<Self, Error> {
        let key_pair = KeyPair::generate().map_err(device_error)?;
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "libu2fflow soft token");
        let cert = params.self_signed(&key_pair).map_err(device_error)?;
        let attestation_key =
            SigningKey::from_pkcs8_der(&key_pair.serialize_der()).map_err(device_error)?;

        Ok(Self {
            attestation_key,
            attestation_cert: cert.der().to_vec(),
            credentials: Arc::new(Mutex::new(HashMap::new())),
            presence: UserPresence::Immediate,
        })
    }

    pub fn with_presence(mut self, presence: UserPresence) -> Self {
        self.presence = presence;
        self
    }

    pub fn attestation_certificate(&self) -> &[u8] {
        &self.attestation_cert
    }

    pub fn attestation_public_key(&self) -> VerifyingKey {
        VerifyingKey::from(&self.attestation_key)
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Web-safe base64 key handles of every credential issued so far.
    pub fn key_handles(&self) -> Vec<String> {
        self.credentials
            .lock()
            .map(|credentials| credentials.keys().map(|handle| base64_url::encode(handle)).collect())
            .unwrap_or_default()
    }

    /// Whether `key` was issued by this token for `app_id`.
    fn owns(&self, app_id: &str, key: &RegisteredKey) -> bool {
        let Ok(handle) = base64_url::decode(&key.key_handle) else {
            return false;
        };
        let app_param = sha256(key.app_id.as_deref().unwrap_or(app_id).as_bytes());
        self.credentials
            .lock()
            .map(|credentials| {
                credentials
                    .get(&handle)
                    .map_or(false, |c| c.app_param == app_param)
            })
            .unwrap_or(false)
    }

    fn deliver<F>(&self, callback: DeviceCallback, timeout: Duration, answer: F)
    where
        F: FnOnce() -> Result<Value, Error> + Send + 'static,
    {
        let respond = move || match answer() {
            Ok(payload) => DeviceOutcome::success(payload),
            Err(error) => {
                warn!(%error, "Soft token failed to answer");
                DeviceOutcome::failure(DeviceStatus::OtherError)
            }
        };

        match self.presence {
            UserPresence::Immediate => callback(respond()),
            UserPresence::After(delay) if delay < timeout => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    callback(respond());
                });
            }
            UserPresence::After(_) | UserPresence::Never => {
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    debug!("No user presence before timeout");
                    callback(DeviceOutcome::failure(DeviceStatus::Timeout));
                });
            }
        }
    }
}

impl DeviceBackend for SoftToken {
    #[instrument(skip_all, fields(%app_id))]
    fn register(
        &self,
        app_id: &str,
        register_requests: &[RegisterRequest],
        registered_keys: &[RegisteredKey],
        callback: DeviceCallback,
        timeout: Duration,
    ) {
        let Some(request) = register_requests.iter().find(|r| r.version == U2F_V2) else {
            warn!("No U2F_V2 register request offered");
            return callback(DeviceOutcome::failure(DeviceStatus::BadRequest));
        };
        if registered_keys.iter().any(|key| self.owns(app_id, key)) {
            info!("Token already registered for this application");
            return callback(DeviceOutcome::failure(DeviceStatus::DeviceIneligible));
        }

        let app_id = app_id.to_owned();
        let challenge = request.challenge.clone();
        let attestation_key = self.attestation_key.clone();
        let attestation_cert = self.attestation_cert.clone();
        let credentials = self.credentials.clone();
        self.deliver(callback, timeout, move || {
            let client_data = client_data(ClientData::FINISH_ENROLLMENT, &challenge, &app_id)?;
            let app_param = sha256(app_id.as_bytes());

            let key = SigningKey::random(&mut OsRng);
            let public_key = key.verifying_key().to_encoded_point(false);
            let mut key_handle = vec![0u8; KEY_HANDLE_LEN];
            OsRng.fill_bytes(&mut key_handle);

            let mut signed = vec![0x00];
            signed.extend(&app_param);
            signed.extend(sha256(client_data.as_bytes()));
            signed.extend(&key_handle);
            signed.extend(public_key.as_bytes());
            let signature: Signature = attestation_key.sign(&signed);

            let mut registration_data = vec![REGISTER_RESERVED];
            registration_data.write_all(public_key.as_bytes()).map_err(device_error)?;
            registration_data
                .write_u8(key_handle.len() as u8)
                .map_err(device_error)?;
            registration_data.write_all(&key_handle).map_err(device_error)?;
            registration_data.write_all(&attestation_cert).map_err(device_error)?;
            registration_data
                .write_all(signature.to_der().as_bytes())
                .map_err(device_error)?;

            credentials.lock().map_err(device_error)?.insert(
                key_handle.clone(),
                Credential {
                    app_param,
                    key,
                    counter: 0,
                },
            );
            info!("Registered new credential");

            let response = RegisterResponse {
                version: U2F_V2.to_owned(),
                registration_data: base64_url::encode(&registration_data),
                client_data: base64_url::encode(&client_data),
            };
            Ok(serde_json::to_value(response)?)
        });
    }

    #[instrument(skip_all, fields(%app_id))]
    fn sign(
        &self,
        app_id: &str,
        challenge: &str,
        registered_keys: &[RegisteredKey],
        callback: DeviceCallback,
        timeout: Duration,
    ) {
        let Some(key) = registered_keys.iter().find(|key| self.owns(app_id, key)) else {
            info!("None of the offered keys belong to this token");
            return callback(DeviceOutcome::failure(DeviceStatus::DeviceIneligible));
        };

        let app_id = app_id.to_owned();
        let challenge = challenge.to_owned();
        let key_handle = key.key_handle.clone();
        let credentials = self.credentials.clone();
        self.deliver(callback, timeout, move || {
            let handle = base64_url::decode(&key_handle)
                .map_err(|e| TransportError::InvalidPayload(e.to_string()))?;
            let client_data = client_data(ClientData::GET_ASSERTION, &challenge, &app_id)?;

            let mut credentials = credentials.lock().map_err(device_error)?;
            let credential = credentials
                .get_mut(&handle)
                .ok_or_else(|| TransportError::Device("credential vanished".to_owned()))?;
            credential.counter = credential.counter.wrapping_add(1);

            let mut signed = credential.app_param.clone();
            signed.write_u8(USER_PRESENT).map_err(device_error)?;
            signed
                .write_u32::<BigEndian>(credential.counter)
                .map_err(device_error)?;
            signed.extend(sha256(client_data.as_bytes()));
            let signature: Signature = credential.key.sign(&signed);

            let mut signature_data = vec![USER_PRESENT];
            signature_data
                .write_u32::<BigEndian>(credential.counter)
                .map_err(device_error)?;
            signature_data
                .write_all(signature.to_der().as_bytes())
                .map_err(device_error)?;
            debug!(counter = credential.counter, "Signed challenge");

            let response = SignResponse {
                key_handle,
                signature_data: base64_url::encode(&signature_data),
                client_data: base64_url::encode(&client_data),
            };
            Ok(serde_json::to_value(response)?)
        });
    }
}

fn client_data(typ: &str, challenge: &str, origin: &str) -> Result<String, Error> {
    let client_data = ClientData {
        typ: typ.to_owned(),
        challenge: challenge.to_owned(),
        origin: origin.to_owned(),
    };
    Ok(serde_json::to_string(&client_data)?)
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::default();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn device_error(error: impl fmt::Display) -> Error {
    Error::Transport(TransportError::Device(error.to_string()))
}
