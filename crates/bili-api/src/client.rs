//! HTTP transport adapter and metadata client for the Bilibili web API.

use reqwest::RequestBuilder;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tracing::debug;

use crate::error::ApiError;
use crate::model::{AssetDescriptor, StreamDescriptor, UserIdentity};
use crate::wire::{ApiEnvelope, NavData, PlayUrlData, ViewData};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_3) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.122 Safari/537.36";

const DEFAULT_API_BASE: &str = "https://api.bilibili.com";
const PORTAL_BASE: &str = "https://www.bilibili.com";

/// Request playurl with the full feature set (`fnval`), so the server offers
/// split DASH variants wherever it supports them, and allow 4K tiers.
const PLAYURL_FNVAL: u32 = 4048;

/// Client configuration. `token` is the bare `SESSDATA` value; `cookie`, when
/// set, is a raw Cookie header that takes precedence over `token`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub token: Option<String>,
    pub cookie: Option<String>,
    pub api_base: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            token: None,
            cookie: None,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    /// Point the client at a different API origin. Used by tests to target a
    /// local mock server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// Metadata client over the three web endpoints the pipeline needs:
/// `/nav` (identity), `/x/web-interface/view` (asset) and
/// `/x/player/playurl` (per-part stream offers).
#[derive(Debug, Clone)]
pub struct BiliClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl BiliClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    fn cookie_value(&self) -> Option<String> {
        self.config
            .cookie
            .clone()
            .or_else(|| self.config.token.as_ref().map(|t| format!("SESSDATA={t}")))
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let mut request = self
            .http
            .get(url)
            .header(USER_AGENT, self.config.user_agent.as_str());
        if let Some(cookie) = self.cookie_value() {
            request = request.header(COOKIE, cookie);
        }
        request
    }

    async fn get_envelope<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        debug!(url = %url, "API request");
        let response = self.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch the identity behind the configured credential. Advisory only:
    /// callers log failures and continue.
    pub async fn fetch_identity(&self) -> Result<UserIdentity, ApiError> {
        let url = format!("{}/nav", self.config.api_base);
        let envelope: ApiEnvelope<NavData> = self
            .get_envelope(&url)
            .await
            .map_err(|err| ApiError::Auth { reason: err.to_string() })?;

        if envelope.code != 0 {
            return Err(ApiError::Auth {
                reason: format!("api code {}: {}", envelope.code, envelope.message),
            });
        }
        let nav = envelope.data.ok_or_else(|| ApiError::Auth {
            reason: "response carried no identity data".to_string(),
        })?;
        Ok(nav.into())
    }

    /// Fetch the asset descriptor. The server-provided part order is
    /// preserved verbatim.
    pub async fn fetch_asset(&self, bvid: &str) -> Result<AssetDescriptor, ApiError> {
        let url = format!("{}/x/web-interface/view?bvid={bvid}", self.config.api_base);
        let envelope: ApiEnvelope<ViewData> = self.get_envelope(&url).await?;

        if envelope.code != 0 {
            return Err(ApiError::NotFound {
                bvid: bvid.to_string(),
                code: envelope.code,
                message: envelope.message,
            });
        }
        let view = envelope.data.ok_or_else(|| ApiError::NotFound {
            bvid: bvid.to_string(),
            code: envelope.code,
            message: "response carried no video data".to_string(),
        })?;
        Ok(view.into())
    }

    /// Fetch the stream offer for one part. Without `quality` the server
    /// returns its default (highest) tier; with it, the offer is locked to
    /// that tier and carries the authoritative, possibly time-limited URLs.
    pub async fn fetch_stream(
        &self,
        bvid: &str,
        cid: u64,
        quality: Option<u32>,
    ) -> Result<StreamDescriptor, ApiError> {
        let mut url = format!(
            "{}/x/player/playurl?bvid={bvid}&cid={cid}&fourk=1&fnval={PLAYURL_FNVAL}",
            self.config.api_base
        );
        if let Some(qn) = quality {
            url.push_str(&format!("&qn={qn}"));
        }

        let envelope: ApiEnvelope<PlayUrlData> = self.get_envelope(&url).await?;
        if envelope.code != 0 {
            return Err(ApiError::StreamUnavailable {
                code: envelope.code,
                message: envelope.message,
            });
        }

        envelope
            .data
            .and_then(PlayUrlData::into_descriptor)
            .ok_or(ApiError::NoVariants)
    }

    /// Header set media downloads must carry: the caller-identifying
    /// User-Agent, a Referer pinned to the owning asset's page, and the
    /// configured auth cookie.
    pub fn download_headers(&self, bvid: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut insert = |name, value: String| match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(err) => debug!(error = %err, "skipping invalid header value"),
        };

        insert(USER_AGENT, self.config.user_agent.clone());
        insert(REFERER, format!("{PORTAL_BASE}/video/{bvid}"));
        if let Some(cookie) = self.cookie_value() {
            insert(COOKIE, cookie);
        }
        headers
    }
}
