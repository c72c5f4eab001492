use anyhow::{Context, Result};
use axum::http::Extensions;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{debug, error, warn};
use reqwest::header::HeaderValue;
use reqwest::{Client, Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The per-item transactions endpoint expects the api token in this header.
pub const TOKEN_HEADER: &str = "token";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub requests_per_second: NonZeroU32,
    pub accept_invalid_certs: bool,
}

pub fn create_client(settings: &ClientSettings) -> Result<ClientWithMiddleware> {
    let reqwest_client = Client::builder()
        .timeout(settings.request_timeout)
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .build()
        .context("Failed to build http client")?;

    let limiter = RateLimiter::direct(Quota::per_second(settings.requests_per_second));
    let rate_limiting_middleware = RateLimitingMiddleware { limiter: Arc::new(limiter) };

    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(250), Duration::from_secs(10))
        .build_with_max_retries(3);

    let client = ClientBuilder::new(reqwest_client)
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(ErrorLoggingMiddleware)
        .with(rate_limiting_middleware)
        .build();

    Ok(client)
}

/// Value for [`TOKEN_HEADER`]. Marked sensitive so it never shows up in debug output.
pub fn api_token_header(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(token).context("api token is not a valid header value")?;
    value.set_sensitive(true);
    Ok(value)
}

struct RateLimitingMiddleware {
    limiter: Arc<DefaultDirectRateLimiter>,
}

#[async_trait::async_trait]
impl Middleware for RateLimitingMiddleware {
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> reqwest_middleware::Result<Response> {
        self.limiter.until_ready().await;
        next.run(req, extensions).await
    }
}

/// Logs every failed attempt. Runs inside the retry middleware, so retried attempts show up too.
pub struct ErrorLoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for ErrorLoggingMiddleware {
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> reqwest_middleware::Result<Response> {
        let started = Instant::now();
        let method = req.method().clone();
        let url = req.url().clone();

        let result = next.run(req, extensions).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS || resp.status().is_server_error() => {
                warn!("{} {} answered {} after {:?}", method, url, resp.status(), elapsed)
            }
            Ok(resp) if !resp.status().is_success() => {
                error!("{} {} answered {} after {:?}", method, url, resp.status(), elapsed)
            }
            Ok(_) => debug!("{} {} succeeded after {:?}", method, url, elapsed),
            Err(err) if err.is_timeout() => warn!("{} {} timed out after {:?}", method, url, elapsed),
            Err(err) => error!("{} {} failed after {:?}: {}", method, url, elapsed, err),
        }

        result
    }
}
