use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use super::{Transport, VerifyResult};
use crate::device::{RegistrationChallenge, SignChallenge};
use crate::error::{ConfigError, Error, TransportError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Relying-party client for the `/enroll`, `/bind`, `/sign` and `/verify` API.
///
/// Every call is scoped by a single `username`; the server keeps one pending
/// challenge per user.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
    username: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(server_url: &str, username: &str) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Self::with_client(client, server_url, username)
    }

    pub fn with_client(client: Client, server_url: &str, username: &str) -> Result<Self, ConfigError> {
        let mut base = Url::parse(server_url).map_err(|e| ConfigError::InvalidUrl {
            url: server_url.to_owned(),
            reason: e.to_string(),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            username: username.to_owned(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base
            .join(path)
            .map_err(|e| Error::Transport(TransportError::Request(e.to_string())))
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, Error> {
        Ok(self
            .client
            .get(self.endpoint(path)?)
            .query(&[("username", &self.username)]))
    }

    fn post(&self, path: &str, body: Option<&str>) -> Result<RequestBuilder, Error> {
        let request = self
            .client
            .post(self.endpoint(path)?)
            .query(&[("username", &self.username)]);
        Ok(match body {
            Some(body) => request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_owned()),
            None => request,
        })
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, Error> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(%status, "Relying party rejected the request");
            return Err(Error::Transport(TransportError::Status {
                status: status.as_u16(),
                body,
            }));
        }
        trace!(%body, "Relying party response");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(username = %self.username))]
    async fn fetch_registration_challenge(&self) -> Result<RegistrationChallenge, Error> {
        let challenge: RegistrationChallenge = Self::send(self.get("enroll")?).await?;
        debug!(app_id = %challenge.app_id, "Registration request from relying party");
        Ok(challenge)
    }

    #[instrument(skip_all, fields(username = %self.username, with_data = data.is_some()))]
    async fn fetch_sign_challenge(&self, data: Option<&str>) -> Result<SignChallenge, Error> {
        let challenge: SignChallenge = Self::send(self.post("sign", data)?).await?;
        debug!(app_id = %challenge.app_id, "Signature request from relying party");
        Ok(challenge)
    }

    #[instrument(skip_all, fields(username = %self.username))]
    async fn confirm_registration(&self, response: &str) -> Result<Value, Error> {
        Self::send(self.post("bind", Some(response))?).await
    }

    #[instrument(skip_all, fields(username = %self.username))]
    async fn verify_signature(&self, response: &str) -> Result<VerifyResult, Error> {
        Self::send(self.post("verify", Some(response))?).await
    }
}
