// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP peer transport.
//!
//! Every operation is a `POST http://{host}{route}` with the request params
//! as the query string and the body (NOTIFY only) as JSON. Any status the
//! peer answers with is returned as-is; only failures to get a response at
//! all become a [`TransportError`].

use crate::config::RemotingConfig;
use crate::error::{FingerprintError, Result};
use crate::transport::{BoxFuture, Operation, PeerRequest, PeerResponse, PeerTransport, TransportError};
use reqwest::header::CONTENT_TYPE;

/// [`PeerTransport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with gzip support and the configured request timeout.
    pub fn new(config: &RemotingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout_duration())
            .gzip(true)
            .build()
            .map_err(|e| FingerprintError::Config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(host: &str, operation: Operation) -> String {
        format!("http://{}{}", host, operation.route())
    }
}

impl PeerTransport for HttpTransport {
    fn request(&self, host: &str, request: PeerRequest) -> BoxFuture<'_, PeerResponse> {
        let url = Self::url(host, request.operation);
        Box::pin(async move {
            let mut builder = self.client.post(&url).query(&request.params);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !request.body.is_empty() {
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(request.body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TransportError(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError(format!("reading body: {}", e)))?;

            Ok(PeerResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}
