use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// The header carrying the credential token of a Datadog account.
const API_KEY_HEADER: &str = "DD-API-KEY";

/// An error returned by an [`Upstream`] delivery attempt.
///
/// Delivery does not distinguish between error kinds, every error is retried the same way.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The request could not be sent or timed out.
    #[error("could not send request")]
    Reqwest(#[from] reqwest::Error),
    /// The upstream responded with a non-success status.
    #[error("upstream responded with {0}")]
    Status(StatusCode),
}

/// The destination of serialized batches.
#[async_trait]
pub trait Upstream: Send + Sync + fmt::Debug {
    /// Posts a JSON body on behalf of the account identified by `auth`.
    async fn post(&self, auth: &str, body: Bytes) -> Result<(), DeliveryError>;
}

/// Delivers batches to the Datadog series API over HTTP.
#[derive(Debug)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: Url,
}

impl HttpUpstream {
    /// Creates an upstream posting to `url`.
    ///
    /// The timeout applies to connecting as well as to every complete request.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn post(&self, auth: &str, body: Bytes) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(API_KEY_HEADER, auth)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(DeliveryError::Status(status)),
        }
    }
}
