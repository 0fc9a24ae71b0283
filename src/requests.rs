use std::{fmt, sync::Arc};

use async_trait::async_trait;
use log::debug;
use reqwest::{
    Client, ClientBuilder,
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue},
};

use crate::{
    config::PortalConfig,
    cookies::{CookieCheckpoint, SessionJar},
    error::TransportError,
    form::Form,
    ratelimit::RateLimiter,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// One request to the portal. Bodies are always form encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub method: Method,
    pub url: String,
    pub form: Option<Form>,
}

impl PortalRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            form: None,
        }
    }

    pub fn post(url: impl Into<String>, form: Form) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            form: Some(form),
        }
    }
}

/// The HTTP seam every remote operation goes through.
///
/// A transport owns the session's cookies: whatever one request sets, the next
/// one sends.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the response body. Non-2xx statuses are
    /// errors.
    async fn send(&self, request: &PortalRequest) -> Result<String, TransportError>;

    /// Marks the current cookie state so a later [`Transport::rollback`] can
    /// return to it. Holds until the checkpoint is rolled back or released.
    fn checkpoint(&self) -> CookieCheckpoint;

    /// Forgets every cookie set since `checkpoint`.
    fn rollback(&self, checkpoint: CookieCheckpoint);

    /// Keeps the cookies set since `checkpoint`; it can no longer be rolled
    /// back to.
    fn release(&self, checkpoint: CookieCheckpoint);

    fn clear_cookies(&self);
}

/// reqwest-backed transport talking to the live portal.
pub struct RequestClient {
    client: Client,
    jar: Arc<SessionJar>,
    rate_limiter: Option<RateLimiter>,
}

impl RequestClient {
    pub fn new(config: &PortalConfig) -> anyhow::Result<Self> {
        let jar = Arc::new(SessionJar::new());

        let mut headers = HeaderMap::new();
        // The portal answers 500 to reqwest's or a browser's usual Accept list.
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let mut builder = ClientBuilder::new()
            .default_headers(headers)
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        let client = builder.build()?;

        let rate_limiter = RateLimiter::with_interval(config.request_interval);
        Ok(Self {
            client,
            jar,
            rate_limiter,
        })
    }

    fn http_error(url: &str) -> impl FnOnce(reqwest::Error) -> TransportError + '_ {
        move |source| TransportError::Http {
            url: url.to_string(),
            source: Arc::new(source),
        }
    }
}

#[async_trait]
impl Transport for RequestClient {
    async fn send(&self, request: &PortalRequest) -> Result<String, TransportError> {
        // Wait (non-blocking) until the pacing policy lets us through.
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.wait_until_ready().await;
        }

        debug!("{} {}", request.method, request.url);
        let builder = match (&request.method, &request.form) {
            (Method::Get, _) => self.client.get(&request.url),
            (Method::Post, form) => self
                .client
                .post(&request.url)
                .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                .body(form.as_ref().map(Form::encode).unwrap_or_default()),
        };

        let response = builder
            .send()
            .await
            .map_err(Self::http_error(&request.url))?;
        let status = response.status();
        debug!("{} {} -> {}", request.method, request.url, status);
        if !status.is_success() {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(Self::http_error(&request.url))?;
        Ok(body)
    }

    fn checkpoint(&self) -> CookieCheckpoint {
        self.jar.checkpoint()
    }

    fn rollback(&self, checkpoint: CookieCheckpoint) {
        self.jar.rollback(checkpoint);
    }

    fn release(&self, checkpoint: CookieCheckpoint) {
        self.jar.release(checkpoint);
    }

    fn clear_cookies(&self) {
        self.jar.clear();
    }
}
