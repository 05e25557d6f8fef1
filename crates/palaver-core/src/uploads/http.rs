//! reqwest-backed implementation of [`UploadTransport`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{self, header};
use serde::de::DeserializeOwned;
use serde::Serialize;

use palaver_api::{
    ApiError, AttachmentId, FinalizedUpload, TransferError, TransferOptions, TransferProgress,
    UploadTicket, UploadTransport,
};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateUploadRequest<'a> {
    owner_type: &'a str,
    file_name: &'a str,
    mime_type: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpUploadTransport {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpUploadTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
    ) -> Result<R, ApiError> {
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !status.is_success() {
            let body = serde_json::from_str(&text).ok();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: text,
                body,
            });
        }
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn initiate_upload(
        &self,
        owner_type: &str,
        file_name: &str,
        mime_type: &str,
    ) -> Result<UploadTicket, ApiError> {
        self.post_json(
            self.url("uploads"),
            &InitiateUploadRequest {
                owner_type,
                file_name,
                mime_type,
            },
        )
        .await
    }

    async fn transfer(
        &self,
        url: &str,
        bytes: Vec<u8>,
        options: TransferOptions,
    ) -> Result<(), TransferError> {
        let total = bytes.len() as u64;
        let chunks: Vec<Vec<u8>> = bytes.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();

        let on_progress = options.on_progress.clone();
        let sent = Arc::new(AtomicU64::new(0));
        let body_stream = futures::stream::iter(chunks).map(move |chunk| {
            let loaded = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
            if let Some(on_progress) = &on_progress {
                on_progress(TransferProgress { loaded, total });
            }
            Ok::<Vec<u8>, std::io::Error>(chunk)
        });

        let request = self
            .client
            .put(url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(body_stream))
            .send();

        let response = tokio::select! {
            () = options.cancel.cancelled() => return Err(TransferError::Canceled),
            outcome = tokio::time::timeout(options.timeout, request) => match outcome {
                Err(_) => return Err(TransferError::Timeout(options.timeout)),
                Ok(Err(e)) => return Err(TransferError::Network(e.to_string())),
                Ok(Ok(response)) => response,
            },
        };

        if !response.status().is_success() {
            return Err(TransferError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn finalize_upload(&self, content_id: &AttachmentId) -> Result<FinalizedUpload, ApiError> {
        #[derive(Serialize)]
        struct Empty {}
        self.post_json(
            self.url(&format!("uploads/{content_id}/finalize")),
            &Empty {},
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_request_serializes_camel_case() {
        let body = InitiateUploadRequest {
            owner_type: "conversation",
            file_name: "report.pdf",
            mime_type: "application/pdf",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["ownerType"], "conversation");
        assert_eq!(value["fileName"], "report.pdf");
        assert_eq!(value["mimeType"], "application/pdf");
    }

    #[test]
    fn url_joining_handles_trailing_slash() {
        let transport = HttpUploadTransport::new("https://api.test/v1/");
        assert_eq!(transport.url("uploads"), "https://api.test/v1/uploads");
    }
}
