//! HTTP client for an XQueue-compatible grading queue.
//!
//! ## Protocol
//!
//! ```text
//! POST {url}/xqueue/submit/   xqueue_header, xqueue_body [, files...]
//! POST {url}/xqueue/login/    username, password
//!
//! reply: {"return_code": 0|1, "content": "..."}
//! ```
//!
//! A `(1, "login_required")` reply triggers one login round trip and one
//! retry. Session cookies are kept by the client between requests.
//!
//! ## Security
//!
//! The password is held in a [`SecretString`] and only exposed when the login
//! form is built.

use assay_core::{QueueReply, QueueSubmission};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::config::XQueueConfig;
use crate::error::{QueueError, RuntimeError};
use crate::grader::ExternalGrader;

/// Client for one queue server.
pub struct XQueueClient {
    base_url: String,
    username: String,
    password: SecretString,
    client: Client,
}

impl std::fmt::Debug for XQueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XQueueClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl XQueueClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingCredentials`] when no username or password is
    /// configured, [`RuntimeError::Queue`] when the HTTP client can't be
    /// built.
    pub fn new(config: XQueueConfig) -> Result<Self, RuntimeError> {
        let XQueueConfig {
            url,
            username,
            password,
            connect_timeout,
            read_timeout,
        } = config;

        let username = username.ok_or_else(|| {
            RuntimeError::MissingCredentials("xqueue.username is not set".to_string())
        })?;
        let password = password.ok_or_else(|| {
            RuntimeError::MissingCredentials(format!(
                "xqueue.password is not set: configure it or {}",
                crate::config::XQUEUE_PASSWORD_ENV
            ))
        })?;

        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            username,
            password,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/xqueue/{}/", self.base_url, path)
    }

    async fn post_submission(&self, submission: &QueueSubmission) -> Result<QueueReply, QueueError> {
        let header = submission.header.to_json_string();
        let request = self.client.post(self.endpoint("submit"));

        let request = if submission.files.is_empty() {
            request.form(&[
                ("xqueue_header", header.as_str()),
                ("xqueue_body", submission.body.as_str()),
            ])
        } else {
            let mut form = Form::new()
                .text("xqueue_header", header)
                .text("xqueue_body", submission.body.clone());
            // Files are read from the start on every attempt.
            for file in &submission.files {
                let bytes = tokio::fs::read(&file.location).await.map_err(|e| {
                    QueueError::File {
                        filename: file.filename.clone(),
                        message: e.to_string(),
                    }
                })?;
                let part = Part::bytes(bytes).file_name(file.filename.clone());
                form = form.part(file.filename.clone(), part);
            }
            request.multipart(form)
        };

        self.send(request).await
    }

    async fn login(&self) -> Result<QueueReply, QueueError> {
        let request = self.client.post(self.endpoint("login")).form(&[
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ]);
        self.send(request).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<QueueReply, QueueError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                QueueError::Connect(e.to_string())
            } else {
                QueueError::Read(e.to_string())
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(QueueError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| QueueError::Read(e.to_string()))?;
        serde_json::from_str::<QueueReply>(&body).map_err(|e| QueueError::Reply(e.to_string()))
    }
}

#[async_trait]
impl ExternalGrader for XQueueClient {
    async fn send_to_queue(&self, submission: &QueueSubmission) -> Result<QueueReply, QueueError> {
        let reply = self.post_submission(submission).await?;
        if !reply.is_login_required() {
            return Ok(reply);
        }

        tracing::debug!(queue = %submission.header.queue_name, "Queue session expired, logging in");
        let login = self.login().await?;
        if !login.is_success() {
            tracing::warn!(queue = %submission.header.queue_name, content = %login.content, "Queue login refused");
            return Err(QueueError::Login(login.content));
        }
        self.post_submission(submission).await
    }

    fn name(&self) -> &str {
        "xqueue"
    }
}
