pub mod api;
pub mod auth;
pub mod collector;


pub use api::{CommentListing, PostPage, RawComment, RedditPostData};
pub use collector::{Collection, CollectionStats, ThreadCollector};

use api::{RedditApiClient, Resource, MAX_PAGE_SIZE};
use auth::Authenticator;
use reqwest::Method;
use serde_json::Value;
use threadscope_core::{
    CoreError, PacingConfig, RateLimitedClient, RedditApiError, RedditCredentials, RetryMetrics,
};
use tracing::{info, warn};

/// Read-only access to the Reddit endpoints the collector needs.
pub trait RedditSource {
    async fn search_posts(
        &self,
        subreddit: &str,
        query: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError>;

    async fn top_posts(
        &self,
        subreddit: &str,
        time_filter: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError>;

    /// Comment listing sorted by top, `depth` levels deep.
    async fn comments(
        &self,
        post_id: &str,
        limit: usize,
        depth: u32,
    ) -> Result<CommentListing, CoreError>;

    /// Expands up to [`MAX_PAGE_SIZE`] ids behind a "more comments" stub.
    async fn more_children(
        &self,
        post_id: &str,
        children: &[String],
    ) -> Result<Vec<RawComment>, CoreError>;
}

impl<S: RedditSource + ?Sized> RedditSource for &S {
    async fn search_posts(
        &self,
        subreddit: &str,
        query: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError> {
        (**self).search_posts(subreddit, query, limit, after).await
    }

    async fn top_posts(
        &self,
        subreddit: &str,
        time_filter: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError> {
        (**self).top_posts(subreddit, time_filter, limit, after).await
    }

    async fn comments(
        &self,
        post_id: &str,
        limit: usize,
        depth: u32,
    ) -> Result<CommentListing, CoreError> {
        (**self).comments(post_id, limit, depth).await
    }

    async fn more_children(
        &self,
        post_id: &str,
        children: &[String],
    ) -> Result<Vec<RawComment>, CoreError> {
        (**self).more_children(post_id, children).await
    }
}

/// Authenticated, paced Reddit client.
pub struct RedditClient {
    api: RedditApiClient,
    auth: Authenticator,
    limiter: RateLimitedClient,
}

impl RedditClient {
    pub fn new(credentials: &RedditCredentials, pacing: &PacingConfig) -> Result<Self, CoreError> {
        let http_client = reqwest::Client::builder()
            .user_agent(&credentials.user_agent)
            .build()?;

        let auth = Authenticator::new(
            credentials,
            http_client.clone(),
            pacing.timeout,
            pacing.retry.clone(),
        )?;

        info!(
            "Reddit client ready (min interval {:?}, timeout {:?})",
            pacing.min_interval, pacing.timeout
        );

        Ok(Self {
            api: RedditApiClient::new(http_client),
            auth,
            limiter: RateLimitedClient::new(pacing.min_interval, pacing.timeout, pacing.retry.clone()),
        })
    }

    /// Authenticates eagerly so bad credentials fail before any query runs.
    pub async fn authenticate(&self) -> Result<(), CoreError> {
        self.auth.access_token().await.map(|_| ())
    }

    pub fn metrics(&self) -> RetryMetrics {
        self.limiter.metrics()
    }

    async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        resource: Resource<'_>,
    ) -> Result<Value, CoreError> {
        let token = self.auth.access_token().await?;
        match self.paced_get(endpoint, &token, params, resource).await {
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                warn!("Reddit rejected the access token for {}, re-authenticating", endpoint);
                self.auth.invalidate().await;
                let token = self.auth.access_token().await?;
                self.paced_get(endpoint, &token, params, resource)
                    .await
                    .map_err(|e| match e {
                        CoreError::RedditApi(RedditApiError::InvalidToken) => {
                            RedditApiError::AuthenticationFailed {
                                reason: "access token rejected after re-authentication".to_string(),
                            }
                            .into()
                        }
                        other => other,
                    })
            }
            other => other,
        }
    }

    async fn paced_get(
        &self,
        endpoint: &str,
        token: &str,
        params: &[(&str, String)],
        resource: Resource<'_>,
    ) -> Result<Value, CoreError> {
        self.limiter
            .call(endpoint, || {
                self.api
                    .make_request(Method::GET, endpoint, token, params, resource)
            })
            .await
    }
}

fn listing_params(limit: usize, after: Option<&str>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
        ("raw_json", "1".to_string()),
    ];
    if let Some(after) = after {
        params.push(("after", after.to_string()));
    }
    params
}

impl RedditSource for RedditClient {
    async fn search_posts(
        &self,
        subreddit: &str,
        query: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError> {
        let endpoint = format!("/r/{}/search", subreddit);
        let mut params = listing_params(limit, after);
        params.extend([
            ("q", query.to_string()),
            ("restrict_sr", "1".to_string()),
            ("sort", "relevance".to_string()),
            ("t", "all".to_string()),
            ("type", "link".to_string()),
        ]);

        let value = self
            .get(&endpoint, &params, Resource::Subreddit(subreddit))
            .await?;
        api::parse_post_listing(value)
    }

    async fn top_posts(
        &self,
        subreddit: &str,
        time_filter: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError> {
        let endpoint = format!("/r/{}/top", subreddit);
        let mut params = listing_params(limit, after);
        params.push(("t", time_filter.to_string()));

        let value = self
            .get(&endpoint, &params, Resource::Subreddit(subreddit))
            .await?;
        api::parse_post_listing(value)
    }

    async fn comments(
        &self,
        post_id: &str,
        limit: usize,
        depth: u32,
    ) -> Result<CommentListing, CoreError> {
        let endpoint = format!("/comments/{}", post_id);
        let params = [
            ("sort", "top".to_string()),
            ("limit", limit.to_string()),
            ("depth", depth.to_string()),
            ("raw_json", "1".to_string()),
        ];

        let value = self.get(&endpoint, &params, Resource::Post(post_id)).await?;
        api::parse_comment_listing(post_id, value)
    }

    async fn more_children(
        &self,
        post_id: &str,
        children: &[String],
    ) -> Result<Vec<RawComment>, CoreError> {
        let ids = &children[..children.len().min(MAX_PAGE_SIZE)];
        let params = [
            ("api_type", "json".to_string()),
            ("link_id", format!("t3_{}", post_id)),
            ("children", ids.join(",")),
            ("sort", "top".to_string()),
            ("limit_children", "false".to_string()),
            ("raw_json", "1".to_string()),
        ];

        let value = self
            .get("/api/morechildren", &params, Resource::Post(post_id))
            .await?;
        api::parse_more_children(value)
    }
}
