use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub body: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Transient failure: the page may succeed when fetched again.
    pub retryable: bool,
    pub message: String,
}

impl TransportError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

pub trait Transport {
    fn fetch(&self, uri: &str) -> Result<FetchedPage, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch(&self, uri: &str) -> Result<FetchedPage, TransportError> {
        (**self).fetch(uri)
    }
}

const ACCEPT_LINKED_DATA: &str = "application/ld+json, application/json;q=0.9, */*;q=0.1";

/// Blocking HTTP transport. Must not be used from inside an async context.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build harvest http client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, uri: &str) -> Result<FetchedPage, TransportError> {
        let url = url::Url::parse(uri)
            .map_err(|err| TransportError::fatal(format!("invalid page url {uri}: {err}")))?;

        let response = self
            .client
            .get(url)
            .header(
                USER_AGENT,
                concat!("ldes-harvester/", env!("CARGO_PKG_VERSION")),
            )
            .header(ACCEPT, ACCEPT_LINKED_DATA)
            .send()
            .map_err(|err| TransportError::retryable(format!("GET {uri}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("GET {uri}: http status {status}");
            return Err(if is_retryable_status(status) {
                TransportError::retryable(message)
            } else {
                TransportError::fatal(message)
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .map_err(|err| TransportError::retryable(format!("read body of {uri}: {err}")))?;

        Ok(FetchedPage { body, content_type })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}
