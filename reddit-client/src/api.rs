use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use threadscope_core::{CoreError, RedditApiError};
use tracing::{debug, error, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const REDDIT_WEB_BASE: &str = "https://reddit.com";
/// Maximum page size Reddit accepts for listings and `morechildren`.
pub const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    pub subreddit: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub removed_by_category: Option<String>,
}

impl RedditPostData {
    pub fn is_removed(&self) -> bool {
        self.removed_by_category.is_some() || is_removed_body(&self.selftext)
    }

    pub fn full_permalink(&self) -> String {
        if self.permalink.starts_with("http") {
            self.permalink.clone()
        } else {
            format!("{}{}", REDDIT_WEB_BASE, self.permalink)
        }
    }
}

pub fn is_removed_body(body: &str) -> bool {
    matches!(body.trim(), "[removed]" | "[deleted]")
}

/// One page of a post listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostPage {
    pub posts: Vec<RedditPostData>,
    pub after: Option<String>,
}

/// A comment as returned by Reddit, before bounding. `parent_id` is the
/// fullname of the parent (`t3_` for top-level comments, `t1_` otherwise).
#[derive(Debug, Clone, PartialEq)]
pub struct RawComment {
    pub id: String,
    pub parent_id: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub created_utc: f64,
}

/// Flattened comment listing of one post in tree pre-order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentListing {
    pub comments: Vec<RawComment>,
    /// Child ids behind top-level "load more comments" stubs.
    pub more_top_level: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    created_utc: f64,
    /// Either an empty string or a nested listing.
    #[serde(default)]
    replies: Value,
}

#[derive(Debug, Deserialize)]
struct MoreData {
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    children: Vec<String>,
}

/// What a request is about, used to report 403/404 precisely.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Subreddit(&'a str),
    Post(&'a str),
}

impl fmt::Display for Resource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Subreddit(name) => write!(f, "r/{}", name),
            Resource::Post(id) => write!(f, "post {}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedditApiClient {
    http_client: Client,
}

impl RedditApiClient {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: &[(&str, String)],
        resource: Resource<'_>,
    ) -> Result<Value, CoreError> {
        let url = format!("{}{}", REDDIT_API_BASE, endpoint);

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token)
            .query(query_params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    return Err(RedditApiError::RequestTimeout.into());
                }
                return Err(CoreError::Network(e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!("Request failed with status: {} for {}", status, endpoint);
            return Err(status_error(status, retry_after, resource).into());
        }

        response.json().await.map_err(|e| {
            error!("Failed to decode response from {}: {}", endpoint, e);
            RedditApiError::InvalidResponse {
                details: format!("undecodable body from {}: {}", endpoint, e),
            }
            .into()
        })
    }
}

pub fn status_error(status: StatusCode, retry_after: u64, resource: Resource<'_>) -> RedditApiError {
    match status.as_u16() {
        429 => RedditApiError::RateLimitExceeded { retry_after },
        401 => RedditApiError::InvalidToken,
        403 => RedditApiError::Forbidden {
            resource: resource.to_string(),
        },
        404 => match resource {
            Resource::Subreddit(name) => RedditApiError::SubredditNotFound {
                subreddit: name.to_string(),
            },
            Resource::Post(id) => RedditApiError::PostNotFound {
                post_id: id.to_string(),
            },
        },
        code => RedditApiError::ServerError { status_code: code },
    }
}

fn invalid(details: impl Into<String>) -> CoreError {
    RedditApiError::InvalidResponse {
        details: details.into(),
    }
    .into()
}

pub fn parse_post_listing(value: Value) -> Result<PostPage, CoreError> {
    let listing: RedditListing<Value> =
        serde_json::from_value(value).map_err(|e| invalid(format!("post listing: {}", e)))?;

    let mut posts = Vec::with_capacity(listing.data.children.len());
    for child in listing.data.children {
        if child.kind != "t3" {
            continue;
        }
        match serde_json::from_value::<RedditPostData>(child.data) {
            Ok(post) => posts.push(post),
            Err(e) => warn!("Skipping undecodable post in listing: {}", e),
        }
    }

    Ok(PostPage {
        posts,
        after: listing.data.after,
    })
}

/// Parses `/comments/{id}`, which returns `[post listing, comment listing]`.
pub fn parse_comment_listing(post_id: &str, value: Value) -> Result<CommentListing, CoreError> {
    let comments = match value {
        Value::Array(mut parts) if parts.len() >= 2 => parts.swap_remove(1),
        _ => return Err(invalid(format!("comment listing for {} is not a pair", post_id))),
    };

    let post_fullname = format!("t3_{}", post_id);
    let mut listing = CommentListing::default();

    // Explicit work stack in reverse so comments come out in pre-order.
    let mut stack: Vec<RedditListingChild<Value>> = children_of(comments)?;
    stack.reverse();

    while let Some(child) = stack.pop() {
        match child.kind.as_str() {
            "t1" => {
                let data: CommentData = match serde_json::from_value(child.data) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Skipping undecodable comment on {}: {}", post_id, e);
                        continue;
                    }
                };
                if data.replies.is_object() {
                    let mut replies = children_of(data.replies)?;
                    replies.reverse();
                    stack.extend(replies);
                }
                listing.comments.push(RawComment {
                    id: data.id,
                    parent_id: data.parent_id,
                    body: data.body,
                    author: data.author,
                    score: data.score,
                    created_utc: data.created_utc,
                });
            }
            "more" => {
                if let Ok(more) = serde_json::from_value::<MoreData>(child.data) {
                    if more.parent_id == post_fullname {
                        listing.more_top_level.extend(more.children);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(listing)
}

/// Parses `/api/morechildren?api_type=json`, a flat list of things.
pub fn parse_more_children(value: Value) -> Result<Vec<RawComment>, CoreError> {
    let things = value
        .pointer("/json/data/things")
        .cloned()
        .ok_or_else(|| invalid("morechildren response without json.data.things"))?;
    let things: Vec<RedditListingChild<Value>> =
        serde_json::from_value(things).map_err(|e| invalid(format!("morechildren: {}", e)))?;

    Ok(things
        .into_iter()
        .filter(|thing| thing.kind == "t1")
        .filter_map(|thing| serde_json::from_value::<CommentData>(thing.data).ok())
        .map(|data| RawComment {
            id: data.id,
            parent_id: data.parent_id,
            body: data.body,
            author: data.author,
            score: data.score,
            created_utc: data.created_utc,
        })
        .collect())
}

fn children_of(listing: Value) -> Result<Vec<RedditListingChild<Value>>, CoreError> {
    let listing: RedditListing<Value> =
        serde_json::from_value(listing).map_err(|e| invalid(format!("comment listing: {}", e)))?;
    Ok(listing.data.children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn comment(id: &str, parent: &str, score: i64, replies: Value) -> Value {
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "parent_id": parent,
                "body": format!("comment {}", id),
                "author": "user",
                "score": score,
                "created_utc": 1_700_000_000.0,
                "replies": replies
            }
        })
    }

    fn listing(children: Vec<Value>) -> Value {
        json!({"kind": "Listing", "data": {"children": children, "after": null}})
    }

    #[test]
    fn test_parse_post_listing() {
        let value = json!({
            "kind": "Listing",
            "data": {
                "after": "t3_next",
                "children": [
                    {"kind": "t3", "data": {
                        "id": "abc", "title": "Helping my mom with her phone",
                        "selftext": "She keeps getting scam texts", "author": "kid",
                        "subreddit": "AgingParents", "url": "https://reddit.com/x",
                        "permalink": "/r/AgingParents/comments/abc/helping/",
                        "created_utc": 1_700_000_000.0, "score": 42, "num_comments": 7
                    }},
                    {"kind": "t3", "data": {"id": "bad"}}
                ]
            }
        });

        let page = parse_post_listing(value).unwrap();
        assert_eq!(page.after.as_deref(), Some("t3_next"));
        assert_eq!(page.posts.len(), 1);
        let post = &page.posts[0];
        assert_eq!(post.score, 42);
        assert!(!post.is_removed());
        assert_eq!(
            post.full_permalink(),
            "https://reddit.com/r/AgingParents/comments/abc/helping/"
        );
    }

    #[test]
    fn test_parse_comment_listing_flattens_in_preorder() {
        let value = json!([
            listing(vec![]),
            listing(vec![
                comment("a", "t3_p", 5, listing(vec![comment("a1", "t1_a", 2, json!(""))])),
                comment("b", "t3_p", 9, json!("")),
                json!({"kind": "more", "data": {"parent_id": "t3_p", "children": ["c", "d"]}}),
                json!({"kind": "more", "data": {"parent_id": "t1_a", "children": ["x"]}}),
            ]),
        ]);

        let parsed = parse_comment_listing("p", value).unwrap();
        let ids: Vec<&str> = parsed.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a1", "b"]);
        assert_eq!(parsed.comments[1].parent_id, "t1_a");
        assert_eq!(parsed.more_top_level, vec!["c", "d"]);
    }

    #[test]
    fn test_parse_comment_listing_rejects_wrong_shape() {
        assert!(parse_comment_listing("p", json!({"kind": "Listing"})).is_err());
    }

    #[test]
    fn test_parse_more_children() {
        let value = json!({"json": {"errors": [], "data": {"things": [
            comment("c", "t3_p", 3, json!("")),
            {"kind": "more", "data": {"parent_id": "t3_p", "children": ["z"]}},
            comment("c1", "t1_c", 1, json!("")),
        ]}}});

        let parsed = parse_more_children(value).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].parent_id, "t1_c");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, 12, Resource::Subreddit("rust")),
            RedditApiError::RateLimitExceeded { retry_after: 12 }
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, 0, Resource::Subreddit("rust")),
            RedditApiError::InvalidToken
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, 0, Resource::Subreddit("nope")),
            RedditApiError::SubredditNotFound { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, 0, Resource::Post("abc")),
            RedditApiError::PostNotFound { .. }
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, 0, Resource::Post("abc")),
            RedditApiError::ServerError { status_code: 502 }
        ));
    }

    #[test]
    fn test_removed_posts_are_detected() {
        let mut post = RedditPostData {
            id: "x".to_string(),
            title: "t".to_string(),
            selftext: "[removed]".to_string(),
            author: String::new(),
            subreddit: "s".to_string(),
            url: String::new(),
            permalink: String::new(),
            created_utc: 0.0,
            score: 0,
            num_comments: 0,
            removed_by_category: None,
        };
        assert!(post.is_removed());

        post.selftext = "fine".to_string();
        post.removed_by_category = Some("moderator".to_string());
        assert!(post.is_removed());
    }
}
