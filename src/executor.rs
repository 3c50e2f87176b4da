use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::{Client, Method};
use tracing::{debug, info, warn};
use url::Url;

use crate::{CaptureRecord, RequestDescriptor, TransportFailure};

/// Prefix of `response` for a request that never got an HTTP response.
pub(crate) const TRANSPORT_ERROR_MARKER: &str = "[transport error]";

#[derive(Debug, Clone)]
pub(crate) struct TransportResponse {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body_text: String,
}

#[async_trait]
pub(crate) trait HttpTransport: Send + Sync {
    async fn fetch(&self, request: &RequestDescriptor)
        -> Result<TransportResponse, TransportFailure>;
}

pub(crate) struct ReqwestTransport {
    client: Client,
    base_url: Option<Url>,
}

impl ReqwestTransport {
    pub(crate) fn new(
        timeout: Option<Duration>,
        base_url: Option<Url>,
    ) -> Result<Self, TransportFailure> {
        let mut builder =
            Client::builder().user_agent(concat!("reqrelay/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportFailure> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportFailure::InvalidMethod(request.method.clone()))?;
        let url = resolve_url(&request.url, self.base_url.as_ref())?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let bytes = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body_text: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Absolute http(s) URLs pass through, `/path` joins `base`, and a bare
/// `host[:port]/path` gets `http://`.
pub(crate) fn resolve_url(raw: &str, base: Option<&Url>) -> Result<Url, TransportFailure> {
    let invalid = |reason: String| TransportFailure::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    if let Ok(url) = Url::parse(raw) {
        if matches!(url.scheme(), "http" | "https") {
            return Ok(url);
        }
        if raw.contains("://") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
    }

    if raw.starts_with('/') {
        return match base {
            Some(base) => base.join(raw).map_err(|e| invalid(e.to_string())),
            None => Err(invalid("relative url and no base_url configured".to_string())),
        };
    }

    Url::parse(&format!("http://{raw}")).map_err(|e| invalid(e.to_string()))
}

async fn capture_one<T: HttpTransport + ?Sized>(
    transport: &T,
    descriptor: &RequestDescriptor,
) -> CaptureRecord {
    let request_summary = descriptor.summary();
    match transport.fetch(descriptor).await {
        Ok(response) => {
            debug!(request = %request_summary, status = response.status, "captured response");
            // Later duplicates win, same as iterating the transport's header map.
            let mut headers = BTreeMap::new();
            for (name, value) in response.headers {
                headers.insert(name, value);
            }
            CaptureRecord {
                request_summary,
                headers,
                response_body: response.body_text,
            }
        }
        Err(err) => {
            warn!(request = %request_summary, error = %err, "request failed");
            CaptureRecord {
                request_summary,
                headers: BTreeMap::new(),
                response_body: format!("{TRANSPORT_ERROR_MARKER} {err}"),
            }
        }
    }
}

/// Runs every descriptor concurrently and waits for all of them. Records come
/// back in completion order; match them up by `request_summary`.
pub(crate) async fn execute_all<T: HttpTransport + ?Sized>(
    transport: &T,
    descriptors: &[RequestDescriptor],
) -> Vec<CaptureRecord> {
    let mut pending: FuturesUnordered<_> = descriptors
        .iter()
        .map(|descriptor| capture_one(transport, descriptor))
        .collect();

    let mut records = Vec::with_capacity(descriptors.len());
    while let Some(record) = pending.next().await {
        records.push(record);
    }
    info!(count = records.len(), "capture batch complete");
    records
}
