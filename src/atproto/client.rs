// SPDX-License-Identifier: MPL-2.0

use crate::atproto::types::{MediaBlob, Session};
use crate::config::DEFAULT_PDS;
use crate::error::MediaError;
use async_trait::async_trait;
use atrium_api::agent::atp_agent::AtpAgent;
use atrium_api::agent::atp_agent::store::MemorySessionStore;
use atrium_api::types::string::{Did, Nsid};
use atrium_xrpc_client::reqwest::ReqwestClient;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not authenticated")]
    NotAuthenticated,
}

type Agent = AtpAgent<MemorySessionStore, ReqwestClient>;

/// The two PDS operations the media pipeline needs.
#[async_trait]
pub trait BlobRpc: Send + Sync {
    /// DID of the signed-in account.
    async fn account_did(&self) -> Result<String, ClientError>;

    /// Service DID of the account's PDS, the audience for blob upload tokens.
    /// Follows the PDS named in the account's DID document, not the entryway
    /// the session was created through.
    async fn pds_audience(&self) -> Result<String, ClientError>;

    /// Mint a short-lived service token for `audience`, scoped to `lexicon_method`.
    async fn get_service_auth(
        &self,
        audience: &str,
        expires_in: Duration,
        lexicon_method: &str,
    ) -> Result<String, ClientError>;

    async fn upload_blob(&self, data: Vec<u8>, mime_type: &str) -> Result<MediaBlob, ClientError>;
}

/// Wraps atrium so the rest of the crate only sees our own types.
pub struct AtprotoClient {
    agent: RwLock<Option<Agent>>,
    service_url: String,
}

impl Default for AtprotoClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AtprotoClient {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_PDS)
    }

    pub fn with_service(service_url: &str) -> Self {
        Self {
            agent: RwLock::new(None),
            service_url: service_url.to_string(),
        }
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub async fn login(&self, handle: &str, password: &str) -> Result<Session, ClientError> {
        let client = ReqwestClient::new(&self.service_url);
        let agent = AtpAgent::new(client, MemorySessionStore::default());

        let result = agent
            .login(handle, password)
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        let session = Session {
            did: result.data.did.to_string(),
            handle: result.data.handle.to_string(),
            access_jwt: result.data.access_jwt.clone(),
            refresh_jwt: result.data.refresh_jwt.clone(),
        };

        *self.agent.write().await = Some(agent);
        Ok(session)
    }

    pub async fn resume_session(&self, session: &Session) -> Result<(), ClientError> {
        let client = ReqwestClient::new(&self.service_url);
        let agent = AtpAgent::new(client, MemorySessionStore::default());

        let atrium_session = atrium_api::agent::atp_agent::AtpSession::from(
            atrium_api::com::atproto::server::create_session::OutputData {
                access_jwt: session.access_jwt.clone(),
                active: None,
                did: session
                    .did
                    .parse()
                    .map_err(|e| ClientError::Auth(format!("invalid DID: {e}")))?,
                did_doc: None,
                email: None,
                email_auth_factor: None,
                email_confirmed: None,
                handle: session
                    .handle
                    .parse()
                    .map_err(|e| ClientError::Auth(format!("invalid handle: {e}")))?,
                refresh_jwt: session.refresh_jwt.clone(),
                status: None,
            },
        );

        agent
            .resume_session(atrium_session)
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        *self.agent.write().await = Some(agent);
        Ok(())
    }

    pub async fn session(&self) -> Option<Session> {
        let agent_guard = self.agent.read().await;
        let agent = agent_guard.as_ref()?;
        let atrium_session = agent.get_session().await?;

        Some(Session {
            did: atrium_session.data.did.to_string(),
            handle: atrium_session.data.handle.to_string(),
            access_jwt: atrium_session.data.access_jwt.clone(),
            refresh_jwt: atrium_session.data.refresh_jwt.clone(),
        })
    }

    pub async fn clear_session(&self) {
        *self.agent.write().await = None;
    }
}

#[async_trait]
impl BlobRpc for AtprotoClient {
    async fn account_did(&self) -> Result<String, ClientError> {
        self.session()
            .await
            .map(|s| s.did)
            .ok_or(ClientError::NotAuthenticated)
    }

    async fn pds_audience(&self) -> Result<String, ClientError> {
        let agent_guard = self.agent.read().await;
        let agent = agent_guard.as_ref().ok_or(ClientError::NotAuthenticated)?;
        audience_for_endpoint(&agent.get_endpoint().await)
    }

    async fn get_service_auth(
        &self,
        audience: &str,
        expires_in: Duration,
        lexicon_method: &str,
    ) -> Result<String, ClientError> {
        let agent_guard = self.agent.read().await;
        let agent = agent_guard.as_ref().ok_or(ClientError::NotAuthenticated)?;

        let aud: Did = audience
            .parse()
            .map_err(|e| ClientError::Auth(format!("invalid audience DID: {e}")))?;
        let lxm: Nsid = lexicon_method
            .parse()
            .map_err(|e| ClientError::Auth(format!("invalid lexicon method: {e}")))?;
        let exp = chrono::Utc::now().timestamp() + expires_in.as_secs() as i64;

        let params = atrium_api::com::atproto::server::get_service_auth::ParametersData {
            aud,
            exp: Some(exp),
            lxm: Some(lxm),
        };

        let output = agent
            .api
            .com
            .atproto
            .server
            .get_service_auth(params.into())
            .await
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        Ok(output.data.token)
    }

    async fn upload_blob(&self, data: Vec<u8>, mime_type: &str) -> Result<MediaBlob, ClientError> {
        let agent_guard = self.agent.read().await;
        let agent = agent_guard.as_ref().ok_or(ClientError::NotAuthenticated)?;

        let output = agent
            .api
            .com
            .atproto
            .repo
            .upload_blob(data)
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        // atrium's BlobRef serializes to the lexicon blob shape.
        let blob_json = serde_json::to_value(&output.data.blob)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        let mut blob: MediaBlob = serde_json::from_value(blob_json)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        // atrium takes the mime type from the response header; keep ours
        blob.mime_type = mime_type.to_string();
        Ok(blob)
    }
}

/// `did:web:<host>` for a PDS service URL.
fn audience_for_endpoint(service_url: &str) -> Result<String, ClientError> {
    let url = url::Url::parse(service_url)
        .map_err(|e| ClientError::InvalidResponse(format!("invalid service URL: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::InvalidResponse("service URL has no host".to_string()))?;
    Ok(format!("did:web:{host}"))
}

impl From<ClientError> for MediaError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotAuthenticated => MediaError::NoClientAvailable,
            ClientError::Auth(msg) => MediaError::AuthenticationFailed(msg),
            ClientError::Network(msg) | ClientError::InvalidResponse(msg) => {
                MediaError::UploadFailed(msg)
            }
        }
    }
}
