//! The top-level SDK handle.
//!
//! Owns the AID → agent map and the shared configuration. Language
//! bindings hold exactly one of these; the core never reaches for a
//! global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use agentcp_identity::IdentityStore;
use serde_json::json;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::config::{AcpConfig, ProxyConfig, TlsConfig};
use crate::error::{AcpError, AcpResult};
use crate::http::HttpClient;

/// Orchestrates agents against one configured network.
pub struct AgentCp {
    config: Arc<RwLock<AcpConfig>>,
    agents: Mutex<HashMap<String, Arc<Agent>>>,
    initialized: AtomicBool,
}

impl Default for AgentCp {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentCp {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(AcpConfig::default())),
            agents: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn initialize(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Invalidate every agent and clear the map. Each agent's offline path
    /// runs before it is dropped.
    pub async fn shutdown(&self) {
        let agents: Vec<Arc<Agent>> = {
            let mut map = self.agents.lock().unwrap();
            map.drain().map(|(_, agent)| agent).collect()
        };
        for agent in agents {
            agent.invalidate().await;
        }
        self.initialized.store(false, Ordering::Release);
        info!("agentcp shut down");
    }

    pub fn set_base_urls(&self, ca_base: &str, ap_base: &str) -> AcpResult<()> {
        if ca_base.is_empty() || ap_base.is_empty() {
            return Err(AcpError::InvalidArgument("base url is empty".into()));
        }
        let mut config = self.config.write().unwrap();
        config.ca_base = ca_base.trim_end_matches('/').to_string();
        config.ap_base = ap_base.trim_end_matches('/').to_string();
        Ok(())
    }

    pub fn set_storage_path(&self, path: impl Into<PathBuf>) -> AcpResult<()> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(AcpError::InvalidArgument("storage path is empty".into()));
        }
        self.config.write().unwrap().storage_path = path;
        Ok(())
    }

    pub fn set_tls_policy(&self, tls: TlsConfig) {
        self.config.write().unwrap().tls = tls;
    }

    pub fn set_proxy(&self, proxy: Option<ProxyConfig>) {
        self.config.write().unwrap().proxy = proxy;
    }

    /// Route `tracing` output through an env-filter built from `directive`
    /// (e.g. `"info"`, `"agentcp=debug"`). A no-op when a subscriber is
    /// already installed.
    pub fn set_log_level(&self, directive: &str) {
        let filter = tracing_subscriber::EnvFilter::try_new(directive)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn http(&self) -> AcpResult<HttpClient> {
        let config = self.config.read().unwrap();
        HttpClient::new(&config.tls, config.proxy.as_ref())
    }

    fn identity_store(&self) -> IdentityStore {
        IdentityStore::new(self.config.read().unwrap().storage_path.clone())
    }

    fn ensure_initialized(&self) -> AcpResult<()> {
        if !self.is_initialized() {
            return Err(AcpError::NotInitialized("call initialize first".into()));
        }
        Ok(())
    }

    /// Create a new identity: generate the key, get the CSR signed by the
    /// CA, persist everything, and register the agent.
    pub async fn create_aid(&self, aid: &str, seed_password: &str) -> AcpResult<Arc<Agent>> {
        if aid.is_empty() || seed_password.is_empty() {
            return Err(AcpError::InvalidArgument("empty aid or password".into()));
        }
        self.ensure_initialized()?;
        if self.agents.lock().unwrap().contains_key(aid) {
            return Err(AcpError::AidAlreadyExists(aid.to_string()));
        }
        let ca_base = self.config.read().unwrap().ca_base.clone();
        if ca_base.is_empty() {
            return Err(AcpError::NotInitialized("CA base URL not configured".into()));
        }

        let store = self.identity_store();
        let pending = store.generate(aid)?;

        let http = self.http()?;
        let url = format!("{ca_base}/api/accesspoint/sign_cert");
        info!(aid, "requesting certificate");
        let resp = http
            .post_json(&url, &json!({ "id": aid, "csr": pending.csr_pem() }))
            .await?;
        let cert_pem = resp
            .get("certificate")
            .and_then(serde_json::Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AcpError::Certificate("no certificate in CA response".into()))?;

        let identity = pending.persist(cert_pem, seed_password)?;
        let agent = Arc::new(Agent::new(
            aid.to_string(),
            Arc::new(identity),
            self.config.clone(),
            http,
        ));
        self.agents
            .lock()
            .unwrap()
            .insert(aid.to_string(), agent.clone());
        info!(aid, "aid created");
        Ok(agent)
    }

    /// Load an existing identity from disk (or return the live agent).
    /// A wrong password surfaces as [`AcpError::Identity`].
    pub async fn load_aid(&self, aid: &str, seed_password: &str) -> AcpResult<Arc<Agent>> {
        if aid.is_empty() {
            return Err(AcpError::InvalidArgument("empty aid".into()));
        }
        self.ensure_initialized()?;
        if let Some(agent) = self.agents.lock().unwrap().get(aid) {
            return Ok(agent.clone());
        }

        let identity = self.identity_store().load(aid, seed_password)?;
        let agent = Arc::new(Agent::new(
            aid.to_string(),
            Arc::new(identity),
            self.config.clone(),
            self.http()?,
        ));
        self.agents
            .lock()
            .unwrap()
            .insert(aid.to_string(), agent.clone());
        info!(aid, "aid loaded");
        Ok(agent)
    }

    /// Invalidate the agent and remove its on-disk identity.
    pub async fn delete_aid(&self, aid: &str) -> AcpResult<()> {
        if aid.is_empty() {
            return Err(AcpError::InvalidArgument("empty aid".into()));
        }
        self.ensure_initialized()?;
        let agent = self.agents.lock().unwrap().remove(aid);
        if let Some(agent) = agent {
            agent.invalidate().await;
        }
        if let Err(e) = self.identity_store().delete(aid) {
            warn!(aid, error = %e, "identity removal failed");
            return Err(e.into());
        }
        info!(aid, "aid deleted");
        Ok(())
    }

    /// AIDs with a certificate under the storage path.
    pub fn list_aids(&self) -> Vec<String> {
        self.identity_store().list()
    }

    /// The live agent for `aid`, if loaded.
    pub fn get_agent(&self, aid: &str) -> Option<Arc<Agent>> {
        self.agents.lock().unwrap().get(aid).cloned()
    }
}
