//! HTTP webhook transport.
//!
//! Posts each rendered message as JSON to the destination URL and maps the
//! response onto the delivery error taxonomy:
//!
//! | Response            | Result        |
//! |---------------------|---------------|
//! | 2xx                 | delivered     |
//! | 429                 | RateLimited   |
//! | 401, 403, 404       | Invalid       |
//! | anything else       | Other         |
//! | no response at all  | Other         |

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::trace;

use super::backoff::DEFAULT_MAX_BACKOFF;
use super::render::RenderedMessage;
use super::transport::{Credentials, DeliveryError, Result, Transport};

/// Used when a 429 carries no usable retry hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Longest retry hint taken from a response; larger hints are clamped.
pub const MAX_RETRY_AFTER: Duration = DEFAULT_MAX_BACKOFF;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    /// Seconds, possibly fractional.
    retry_after: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: Client,
}

impl WebhookTransport {
    pub fn new(client: Client) -> Self {
        WebhookTransport { client }
    }

    /// Builds a transport with its own client and the default timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DeliveryError::from_reqwest)?;
        Ok(Self::new(client))
    }
}

fn parse_retry_after_header(response: &Response) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = value.trim().parse().ok()?;
    seconds(secs)
}

fn seconds(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    let delay = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
    Some(delay.min(MAX_RETRY_AFTER))
}

async fn classify(response: Response) -> DeliveryError {
    let status = response.status();
    let code = status.as_u16();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let header = parse_retry_after_header(&response);
        let body = response
            .json::<RateLimitBody>()
            .await
            .ok()
            .and_then(|b| b.retry_after)
            .and_then(seconds);
        return DeliveryError::rate_limited(body.or(header).unwrap_or(DEFAULT_RETRY_AFTER));
    }

    let text = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DeliveryError::invalid(Some(code), text)
        }
        _ => DeliveryError::other(Some(code), text),
    }
}

impl Transport for WebhookTransport {
    async fn send(&self, credentials: &Credentials, message: &RenderedMessage) -> Result<()> {
        let response = self
            .client
            .post(&credentials.url)
            .json(message)
            .send()
            .await
            .map_err(DeliveryError::from_reqwest)?;

        trace!(status = %response.status(), "Webhook response");
        if response.status().is_success() {
            return Ok(());
        }
        Err(classify(response).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::render::Embed;
    use crate::delivery::transport::DeliveryErrorKind;
    use mockito::{Matcher, Server};

    fn message() -> RenderedMessage {
        RenderedMessage {
            content: None,
            embeds: vec![Embed {
                title: Some("memberBan".into()),
                ..Embed::default()
            }],
        }
    }

    async fn send_to(server: &Server) -> Result<()> {
        let transport = WebhookTransport::new(Client::new());
        let creds = Credentials::new(format!("{}/api/webhooks/1/token", server.url()));
        transport.send(&creds, &message()).await
    }

    #[tokio::test]
    async fn success_posts_json_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/webhooks/1/token")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "embeds": [{ "title": "memberBan" }]
            })))
            .with_status(204)
            .create_async()
            .await;

        assert!(send_to(&server).await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_reads_body_retry_after() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/webhooks/1/token")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"You are being rate limited.","retry_after":1.5}"#)
            .create_async()
            .await;

        let err = send_to(&server).await.unwrap_err();
        assert_eq!(
            err.kind,
            DeliveryErrorKind::RateLimited {
                retry_after: Duration::from_millis(1500)
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_falls_back_to_header() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhooks/1/token")
            .with_status(429)
            .with_header("retry-after", "3")
            .create_async()
            .await;

        let err = send_to(&server).await.unwrap_err();
        assert_eq!(
            err.kind,
            DeliveryErrorKind::RateLimited {
                retry_after: Duration::from_secs(3)
            }
        );
    }

    #[tokio::test]
    async fn rate_limit_without_hint_uses_default() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhooks/1/token")
            .with_status(429)
            .create_async()
            .await;

        let err = send_to(&server).await.unwrap_err();
        assert_eq!(
            err.kind,
            DeliveryErrorKind::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }

    #[tokio::test]
    async fn huge_retry_after_is_clamped() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhooks/1/token")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(r#"{"retry_after":1e20}"#)
            .create_async()
            .await;

        let err = send_to(&server).await.unwrap_err();
        assert_eq!(
            err.kind,
            DeliveryErrorKind::RateLimited {
                retry_after: MAX_RETRY_AFTER
            }
        );
    }

    #[test]
    fn retry_hint_parsing_never_panics() {
        assert_eq!(seconds(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(seconds(f64::INFINITY), Some(MAX_RETRY_AFTER));
        assert_eq!(seconds(1e300), Some(MAX_RETRY_AFTER));
        assert_eq!(seconds(f64::NAN), None);
        assert_eq!(seconds(-1.0), None);
    }

    #[tokio::test]
    async fn unknown_webhook_is_invalid() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhooks/1/token")
            .with_status(404)
            .with_body(r#"{"message":"Unknown Webhook","code":10015}"#)
            .create_async()
            .await;

        let err = send_to(&server).await.unwrap_err();
        assert_eq!(err.kind, DeliveryErrorKind::Invalid);
        assert_eq!(err.status_code, Some(404));
    }

    #[tokio::test]
    async fn server_error_is_other() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhooks/1/token")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let err = send_to(&server).await.unwrap_err();
        assert_eq!(err.kind, DeliveryErrorKind::Other);
    }

    #[tokio::test]
    async fn connection_failure_is_other() {
        let transport = WebhookTransport::new(Client::new());
        let creds = Credentials::new("http://127.0.0.1:1/unreachable");
        let err = transport.send(&creds, &message()).await.unwrap_err();
        assert_eq!(err.kind, DeliveryErrorKind::Other);
        assert!(err.source.is_some());
    }
}
