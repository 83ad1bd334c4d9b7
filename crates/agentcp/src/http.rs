//! HTTPS client shared by the auth, CA and file paths.
//!
//! A thin layer over reqwest: JSON POST with connect-close semantics,
//! multipart upload with a progress callback, and streaming GET-to-file.
//! TLS verification is policy-controlled; a process-wide DNS callback can
//! front the OS resolver (present because some mobile resolvers bypass
//! system DNS).

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::{ProxyConfig, TlsConfig};
use crate::error::{AcpError, AcpResult};

/// Progress callback: `(bytes_done, bytes_total)`. Total is zero when the
/// server does not announce a length.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Host-to-addresses callback consulted before the OS resolver.
pub type DnsFn = Arc<dyn Fn(&str) -> Option<Vec<IpAddr>> + Send + Sync>;

static DNS_OVERRIDE: RwLock<Option<DnsFn>> = RwLock::new(None);

/// Install or clear the process-wide DNS callback.
pub fn set_dns_resolver(resolver: Option<DnsFn>) {
    *DNS_OVERRIDE.write().unwrap() = resolver;
}

struct AcpResolver;

impl Resolve for AcpResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let hook = DNS_OVERRIDE.read().unwrap().clone();
            if let Some(hook) = hook {
                if let Some(ips) = hook(&host) {
                    debug!(host, count = ips.len(), "dns override hit");
                    let addrs = ips
                        .into_iter()
                        .map(|ip| SocketAddr::new(ip, 0))
                        .collect::<Vec<_>>();
                    return Ok(Box::new(addrs.into_iter()) as Addrs);
                }
            }
            // getaddrinfo, off the async threads.
            let resolved = tokio::task::spawn_blocking(move || {
                std::net::ToSocketAddrs::to_socket_addrs(&(host.as_str(), 0))
                    .map(|iter| iter.collect::<Vec<_>>())
            })
            .await
            .map_err(box_err)?
            .map_err(box_err)?;
            Ok(Box::new(resolved.into_iter()) as Addrs)
        })
    }
}

fn box_err<E: std::error::Error + Send + Sync + 'static>(
    e: E,
) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(e)
}

/// Shared HTTPS client.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(tls: &TlsConfig, proxy: Option<&ProxyConfig>) -> AcpResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("AgentCP/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!tls.verify)
            .dns_resolver(Arc::new(AcpResolver));
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(&proxy.url)
                    .map_err(|e| AcpError::InvalidArgument(format!("bad proxy url: {e}")))?,
            );
        }
        let client = builder
            .build()
            .map_err(|e| AcpError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// POST a JSON body and return the parsed JSON response. Non-2xx
    /// statuses and transport failures both surface as [`AcpError::Network`]
    /// so callers can treat them as retryable.
    pub async fn post_json(&self, url: &str, body: &Value) -> AcpResult<Value> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AcpError::Network(format!("POST {url}: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AcpError::Network(format!("POST {url}: body read: {e}")))?;
        if !status.is_success() {
            let excerpt: String = text.chars().take(200).collect();
            warn!(url, %status, "http request failed");
            return Err(AcpError::Network(format!("POST {url}: {status}: {excerpt}")));
        }
        serde_json::from_str(&text)
            .map_err(|e| AcpError::Network(format!("POST {url}: bad json: {e}")))
    }

    /// Upload a file as a multipart form field named `file`, reporting
    /// progress as chunks leave the process.
    pub async fn upload_file(
        &self,
        url: &str,
        path: &Path,
        signature: &str,
        progress: Option<ProgressFn>,
    ) -> AcpResult<Value> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let counter = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let stream = tokio_util::io::ReaderStream::new(file).map(move |chunk| {
            if let (Ok(c), Some(progress)) = (&chunk, progress.as_ref()) {
                let done = counter.fetch_add(c.len() as u64, std::sync::atomic::Ordering::Relaxed)
                    + c.len() as u64;
                progress(done, total);
            }
            chunk
        });

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(stream),
            total,
        )
        .file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(url)
            .header("X-Signature", signature)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AcpError::Network(format!("upload {url}: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AcpError::Network(format!("upload {url}: body read: {e}")))?;
        if !status.is_success() {
            return Err(AcpError::Network(format!("upload {url}: {status}")));
        }
        serde_json::from_str(&text)
            .map_err(|e| AcpError::Network(format!("upload {url}: bad json: {e}")))
    }

    /// Stream a GET response into `output`, reporting progress per chunk.
    /// Returns the number of bytes written.
    pub async fn download_to_file(
        &self,
        url: &str,
        output: &Path,
        signature: &str,
        progress: Option<ProgressFn>,
    ) -> AcpResult<u64> {
        let resp = self
            .client
            .get(url)
            .header("X-Signature", signature)
            .send()
            .await
            .map_err(|e| AcpError::Network(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AcpError::Network(format!("GET {url}: {status}")));
        }
        let total = resp.content_length().unwrap_or(0);

        let mut file = tokio::fs::File::create(output).await?;
        let mut stream = resp.bytes_stream();
        let mut done: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AcpError::Network(format!("GET {url}: {e}")))?;
            file.write_all(&chunk).await?;
            done += chunk.len() as u64;
            if let Some(progress) = progress.as_ref() {
                progress(done, total);
            }
        }
        file.flush().await?;
        Ok(done)
    }
}
