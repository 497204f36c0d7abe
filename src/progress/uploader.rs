//! Multipart upload boundary for submitting import jobs.
//!
//! Wraps the platform's import endpoint using [`reqwest`]. The core only
//! depends on the response shape (`{success, status, jobId}`), not on the
//! endpoint's internals.

use crate::config::ClientConfig;

use super::job::{ImportAccepted, ImportFile};

/// HTTP client for the import endpoint.
#[derive(Debug, Clone)]
pub struct ImportApi {
    client: reqwest::Client,
    base_url: String,
    import_path: String,
    deduplicate_threshold: u32,
}

/// Errors from the import endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ImportApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint returned a non-2xx status code.
    #[error("import endpoint error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The endpoint answered 2xx but flagged the upload as unsuccessful.
    #[error("import request was rejected by the server")]
    Rejected,
}

impl ImportApi {
    /// Creates an API client from the shared configuration.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Creates an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling with other callers).
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            base_url: config.api_base_url.clone(),
            import_path: config.import_path.clone(),
            deduplicate_threshold: config.deduplicate_threshold,
        }
    }

    /// Uploads one file for import.
    ///
    /// Sends a multipart `POST` carrying the file part, its name, and the
    /// configured deduplication threshold.
    ///
    /// # Errors
    ///
    /// [`ImportApiError::Request`] on transport failure,
    /// [`ImportApiError::Api`] on a non-2xx response, and
    /// [`ImportApiError::Rejected`] when the server answers 2xx with
    /// `success: false`.
    pub async fn import_file(&self, file: &ImportFile) -> Result<ImportAccepted, ImportApiError> {
        let part = reqwest::multipart::Part::bytes(file.contents.clone())
            .file_name(file.name.clone());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("fileName", file.name.clone())
            .text(
                "deduplicateThreshold",
                self.deduplicate_threshold.to_string(),
            );

        let response = self
            .client
            .post(format!("{}{}", self.base_url, self.import_path))
            .multipart(form)
            .send()
            .await?;

        let accepted: ImportAccepted = Self::parse_response(response).await?;
        if !accepted.success {
            return Err(ImportApiError::Rejected);
        }

        tracing::debug!(
            file_name = %file.name,
            job_id = %accepted.job_id,
            "import accepted"
        );
        Ok(accepted)
    }

    // ---- private helpers ----

    /// Ensures the response has a success status code, returning the
    /// status and body text as an [`ImportApiError::Api`] otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ImportApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ImportApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parses a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ImportApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
