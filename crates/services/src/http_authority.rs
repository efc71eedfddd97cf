use std::env;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::authority::{
    AnswerVerifier, HeartbeatRequest, HeartbeatResponse, TimeAuthority, UnloadBeacon,
    UnloadBeaconPayload, VerificationRequest, VerificationResponse,
};
use crate::error::AuthorityError;

#[derive(Clone, Debug)]
pub struct AuthorityEndpointConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl AuthorityEndpointConfig {
    /// Reads `COMPLIANCE_AUTHORITY_URL` and the optional `COMPLIANCE_AUTHORITY_TOKEN`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("COMPLIANCE_AUTHORITY_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let token = env::var("COMPLIANCE_AUTHORITY_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        Some(Self { base_url, token })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

/// Talks to remote time and verification authorities with JSON POSTs.
#[derive(Clone)]
pub struct HttpAuthorityClient {
    client: Client,
    config: Option<AuthorityEndpointConfig>,
}

impl HttpAuthorityClient {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(AuthorityEndpointConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<AuthorityEndpointConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    async fn post<Req, Resp>(&self, path: &str, payload: &Req) -> Result<Resp, AuthorityError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let config = self.config.as_ref().ok_or(AuthorityError::Disabled)?;
        let mut request = self.client.post(config.endpoint(path)).json(payload);
        if let Some(token) = &config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AuthorityError::HttpStatus(response.status()));
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| AuthorityError::Decode(e.to_string()))
    }
}

#[async_trait]
impl TimeAuthority for HttpAuthorityClient {
    async fn heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, AuthorityError> {
        self.post("heartbeat", request).await
    }
}

#[async_trait]
impl AnswerVerifier for HttpAuthorityClient {
    async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> Result<VerificationResponse, AuthorityError> {
        self.post("verify-answer", request).await
    }
}

impl UnloadBeacon for HttpAuthorityClient {
    fn send(&self, payload: UnloadBeaconPayload) {
        let Some(config) = self.config.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session_id = %payload.session_id, "no runtime available for unload beacon");
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            let mut request = client.post(config.endpoint("session-unload")).json(&payload);
            if let Some(token) = &config.token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(resp) => debug!(session_id = %payload.session_id, status = %resp.status(), "unload beacon sent"),
                Err(err) => debug!(session_id = %payload.session_id, error = %err, "unload beacon lost"),
            }
        });
    }
}
