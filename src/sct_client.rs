use crate::reqwest_helpers::TOKEN_HEADER;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mockall::automock;
use reqwest::header::HeaderValue;
use reqwest::{StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use sct_domain::{CommodityListing, ItemTransaction, LeaderboardPosition, Location, Page};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://sc-trade.tools/api";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest_middleware::Error,
    },
    #[error("request to {url} failed with status {status}: {body}")]
    Status { url: String, status: StatusCode, body: String },
    #[error("failed to decode response of {url} at '{path}': {message}")]
    Decode { url: String, path: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ScTradeClient {
    client: ClientWithMiddleware,
    base_url: Url,
    api_token: Option<HeaderValue>,
}

impl ScTradeClient {
    pub fn new(client: ClientWithMiddleware, base_url: Url, api_token: Option<HeaderValue>) -> Self {
        ScTradeClient {
            client,
            base_url,
            api_token,
        }
    }

    /// Appends percent-encoded path segments to the base url.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base url {} can't carry a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, segments: &[&str]) -> Result<RequestBuilder> {
        Ok(self.client.get(self.endpoint(segments)?))
    }

    /// Only the endpoints that need it get to see the token.
    fn get_with_token(&self, segments: &[&str]) -> Result<RequestBuilder> {
        let token = self
            .api_token
            .as_ref()
            .ok_or_else(|| anyhow!("{} needs an api token", segments.join("/")))?;
        Ok(self.get(segments)?.header(TOKEN_HEADER, token.clone()))
    }

    async fn make_api_call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let request = request.build().context("Failed to build request")?;
        let url = request.url().to_string();

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|source| ApiError::Transport { url: url.clone(), source })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|err| ApiError::Transport {
            url: url.clone(),
            source: err.into(),
        })?;

        if !status.is_success() {
            return Err(ApiError::Status { url, status, body }.into());
        }

        let deserializer = &mut serde_json::Deserializer::from_str(&body);
        let decoded = serde_path_to_error::deserialize(deserializer).map_err(|err| ApiError::Decode {
            url,
            path: err.path().to_string(),
            message: err.inner().to_string(),
        })?;

        Ok(decoded)
    }
}

#[async_trait]
impl ScTradeClientTrait for ScTradeClient {
    async fn get_commodity_listings_page(&self, page: u32) -> Result<Page<CommodityListing>> {
        let request = self.get(&["crowdsource", "commodity-listings"])?;
        self.make_api_call(request.query(&[("page", page.to_string())])).await
    }

    async fn get_locations(&self) -> Result<Vec<Location>> {
        self.make_api_call(self.get(&["locations"])?).await
    }

    async fn get_items(&self) -> Result<Vec<String>> {
        self.make_api_call(self.get(&["items"])?).await
    }

    async fn get_item_transactions(&self, item_name: &str) -> Result<Vec<ItemTransaction>> {
        self.make_api_call(self.get_with_token(&["items", item_name, "transactions"])?)
            .await
    }

    async fn get_current_leaderboard(&self) -> Result<Vec<LeaderboardPosition>> {
        self.make_api_call(self.get(&["crowdsource", "leaderboards", "current"])?)
            .await
    }
}

#[automock]
#[async_trait]
pub trait ScTradeClientTrait: Send + Sync + Debug {
    /// Page `page` (0-based) of the newest-first commodity listing feed.
    async fn get_commodity_listings_page(&self, page: u32) -> Result<Page<CommodityListing>>;

    async fn get_locations(&self) -> Result<Vec<Location>>;

    async fn get_items(&self) -> Result<Vec<String>>;

    /// Needs the api token.
    async fn get_item_transactions(&self, item_name: &str) -> Result<Vec<ItemTransaction>>;

    async fn get_current_leaderboard(&self) -> Result<Vec<LeaderboardPosition>>;
}
