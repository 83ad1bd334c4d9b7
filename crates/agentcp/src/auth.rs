//! Challenge/proof authentication against an access point.
//!
//! Round one posts `{agent_id, request_id}` to `<server>/sign_in`. A legacy
//! server may answer with a `signature` directly; otherwise the response
//! carries a `nonce` which is signed (ECDSA-SHA-256) and posted back with
//! the public key and certificate. The final response yields the session
//! signature, the UDP heartbeat endpoint and the sign cookie.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentcp_identity::Identity;
use agentcp_proto::envelope::new_uuid_hex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{AcpError, AcpResult};
use crate::http::HttpClient;

/// Default in-call retry budget for transport failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Pause between transport-failure retries.
const RETRY_PAUSE: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Default, Deserialize)]
struct ChallengeResponse {
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProofResponse {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    server_ip: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    sign_cookie: u64,
}

#[derive(Debug, Clone, Default)]
struct AuthState {
    signature: String,
    server_ip: String,
    port: u16,
    sign_cookie: u64,
    signed_in: bool,
}

/// Signs an agent in against one server and holds the resulting session.
pub struct AuthClient {
    agent_id: String,
    server_url: String,
    identity: Arc<Identity>,
    http: HttpClient,
    state: Mutex<AuthState>,
}

impl AuthClient {
    /// `server_url` is the API base; `/sign_in` and `/sign_out` are
    /// appended.
    pub fn new(
        agent_id: impl Into<String>,
        server_url: impl Into<String>,
        identity: Arc<Identity>,
        http: HttpClient,
    ) -> Self {
        let mut server_url = server_url.into();
        while server_url.ends_with('/') {
            server_url.pop();
        }
        Self {
            agent_id: agent_id.into(),
            server_url,
            identity,
            http,
            state: Mutex::new(AuthState::default()),
        }
    }

    /// Run the two-step handshake. Transport failures are retried up to
    /// `max_retries` times with a pause in between; protocol failures abort
    /// immediately.
    pub async fn sign_in(&self, max_retries: u32) -> AcpResult<()> {
        let sign_in_url = format!("{}/sign_in", self.server_url);

        for attempt in 0..=max_retries {
            // Step 1: challenge.
            let request_id = new_uuid_hex();
            let challenge = json!({ "agent_id": self.agent_id, "request_id": request_id });
            let body = match self.http.post_json(&sign_in_url, &challenge).await {
                Ok(body) => body,
                Err(e) if attempt < max_retries => {
                    warn!(attempt, error = %e, "sign-in challenge failed, retrying");
                    tokio::time::sleep(RETRY_PAUSE).await;
                    continue;
                }
                Err(e) => return Err(AcpError::AuthFailed(format!("challenge: {e}"))),
            };
            let challenge_resp: ChallengeResponse = serde_json::from_value(body)
                .map_err(|e| AcpError::AuthFailed(format!("bad challenge response: {e}")))?;

            if challenge_resp.nonce.is_empty() {
                // Legacy servers hand the signature over directly.
                if !challenge_resp.signature.is_empty() {
                    info!(agent_id = %self.agent_id, "sign-in ok (direct signature)");
                    let mut state = self.state.lock().unwrap();
                    state.signature = challenge_resp.signature;
                    state.signed_in = true;
                    return Ok(());
                }
                return Err(AcpError::AuthFailed(
                    "challenge response has neither nonce nor signature".into(),
                ));
            }

            // Step 2: proof.
            let sig_hex = self
                .identity
                .sign_sha256_hex(challenge_resp.nonce.as_bytes())
                .map_err(|e| AcpError::AuthFailed(format!("nonce signing: {e}")))?;
            let public_key = self
                .identity
                .public_key_pem()
                .map_err(|e| AcpError::AuthFailed(format!("public key: {e}")))?;
            let proof = json!({
                "agent_id": self.agent_id,
                "request_id": request_id,
                "nonce": challenge_resp.nonce,
                "public_key": public_key,
                "cert": self.identity.cert_pem(),
                "signature": sig_hex,
            });

            let body = match self.http.post_json(&sign_in_url, &proof).await {
                Ok(body) => body,
                Err(e) if attempt < max_retries => {
                    warn!(attempt, error = %e, "sign-in proof failed, retrying");
                    tokio::time::sleep(RETRY_PAUSE).await;
                    continue;
                }
                Err(e) => return Err(AcpError::AuthFailed(format!("proof: {e}"))),
            };
            let proof_resp: ProofResponse = serde_json::from_value(body)
                .map_err(|e| AcpError::AuthFailed(format!("bad proof response: {e}")))?;
            if proof_resp.signature.is_empty() {
                return Err(AcpError::AuthFailed("proof response missing signature".into()));
            }

            info!(
                agent_id = %self.agent_id,
                server_ip = %proof_resp.server_ip,
                port = proof_resp.port,
                "sign-in ok"
            );
            let mut state = self.state.lock().unwrap();
            state.signature = proof_resp.signature;
            state.server_ip = proof_resp.server_ip;
            state.port = proof_resp.port;
            state.sign_cookie = proof_resp.sign_cookie;
            state.signed_in = true;
            return Ok(());
        }
        Err(AcpError::AuthFailed("sign-in retries exhausted".into()))
    }

    /// Best-effort sign-out; always clears local session state.
    pub async fn sign_out(&self) {
        let signature = {
            let state = self.state.lock().unwrap();
            if !state.signed_in {
                return;
            }
            state.signature.clone()
        };
        let url = format!("{}/sign_out", self.server_url);
        let body = json!({ "agent_id": self.agent_id, "signature": signature });
        if let Err(e) = self.http.post_json(&url, &body).await {
            debug!(error = %e, "sign-out failed (ignored)");
        }
        let mut state = self.state.lock().unwrap();
        state.signature.clear();
        state.signed_in = false;
    }

    pub fn signature(&self) -> String {
        self.state.lock().unwrap().signature.clone()
    }

    pub fn server_ip(&self) -> String {
        self.state.lock().unwrap().server_ip.clone()
    }

    pub fn port(&self) -> u16 {
        self.state.lock().unwrap().port
    }

    pub fn sign_cookie(&self) -> u64 {
        self.state.lock().unwrap().sign_cookie
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.lock().unwrap().signed_in
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}
