use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::session::{session_from_body, Session};
use crate::util::{new_id, preview_for_log};

use super::ensure_crypto_provider;

const CREATE_PATH: &str = "/turing/conversation/create";
const CLIENT_USER_AGENT: &str =
    "azsdk-js-api-client-factory/1.0.0-beta.1 core-rest-pipeline/1.10.0 OS/Win32";
const REFERER: &str = "https://www.bing.com/search?q=Bing+AI&showconv=1";

fn build_reqwest_client(
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, ClientError> {
    let mut builder = reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ClientError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ClientError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Creates remote sessions through the conversation-create endpoint.
pub struct SessionFactory {
    client: reqwest::Client,
    endpoint: url::Url,
    cookie: String,
    debug: bool,
}

impl SessionFactory {
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for an unusable host and
    /// [`ClientError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        ensure_crypto_provider();
        let service = &config.service;
        let endpoint = url::Url::parse(&service.host)
            .and_then(|host| host.join(CREATE_PATH))
            .map_err(|err| ClientError::Config(format!("Invalid service.host: {err}")))?;
        let client = build_reqwest_client(
            config.exchange.http_timeout(),
            service.use_env_proxy,
            service.proxy.as_deref(),
        )?;
        Ok(Self {
            client,
            endpoint,
            cookie: service.cookie_header(),
            debug: config.features.debug,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Request a new session triple.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the request fails and
    /// [`ClientError::SessionCreationFailed`] when the body carries no usable
    /// session.
    pub async fn create(&self) -> Result<Session, ClientError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header("accept", "application/json")
            .header("accept-language", "en-US,en;q=0.9")
            .header("content-type", "application/json")
            .header("x-ms-client-request-id", new_id())
            .header("x-ms-useragent", CLIENT_USER_AGENT)
            .header("cookie", &self.cookie)
            .header("referer", REFERER)
            .send()
            .await
            .map_err(|err| ClientError::Transport(format!("Session request failed: {err}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::Transport(format!("Session body read failed: {err}")))?;
        self.session_from_response(status.as_u16(), &body)
    }

    fn session_from_response(&self, status: u16, body: &Bytes) -> Result<Session, ClientError> {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            let text = String::from_utf8_lossy(body);
            return Err(ClientError::SessionCreationFailed {
                code: format!("HTTP {status}"),
                message: preview_for_log(&text).to_string(),
            });
        };
        if self.debug {
            tracing::debug!(status, body = %value, "session create response");
        }
        session_from_body(&value)
    }
}
