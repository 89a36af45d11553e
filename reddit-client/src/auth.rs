use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError,
    TokenResponse, TokenUrl,
};
use std::time::{Duration, Instant};
use threadscope_core::{CoreError, RedditApiError, RedditCredentials, RetryConfig, RetryExecutor};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

const AUTHORIZE_URL: &str = "https://www.reddit.com/api/v1/authorize";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
/// Tokens are refreshed this long before Reddit says they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: Instant,
}

impl RedditToken {
    pub fn is_expired(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN >= self.expires_at
    }
}

/// Application-only OAuth (client credentials grant) with a cached token.
pub struct Authenticator {
    oauth: BasicClient,
    http: reqwest::Client,
    token: Mutex<Option<RedditToken>>,
    retry: RetryExecutor,
    request_timeout: Duration,
}

impl Authenticator {
    pub fn new(
        credentials: &RedditCredentials,
        http: reqwest::Client,
        request_timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, CoreError> {
        let invalid_url = |e: oauth2::url::ParseError| RedditApiError::AuthenticationFailed {
            reason: format!("invalid OAuth endpoint: {}", e),
        };
        let oauth = BasicClient::new(
            ClientId::new(credentials.client_id.clone()),
            Some(ClientSecret::new(credentials.client_secret.clone())),
            AuthUrl::new(AUTHORIZE_URL.to_string()).map_err(invalid_url)?,
            Some(TokenUrl::new(TOKEN_URL.to_string()).map_err(invalid_url)?),
        )
        .set_auth_type(AuthType::BasicAuth);

        Ok(Self {
            oauth,
            http,
            token: Mutex::new(None),
            retry: RetryExecutor::new(retry),
            request_timeout,
        })
    }

    /// Returns a valid access token, authenticating when none is cached or
    /// the cached one has expired. Any failure here is an authentication failure.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
            info!("Reddit access token expired, re-authenticating");
        }

        let token = self
            .retry
            .execute("reddit token request", || self.request_token())
            .await
            .map_err(|e| match e {
                CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }) => e,
                other => RedditApiError::AuthenticationFailed {
                    reason: other.to_string(),
                }
                .into(),
            })?;

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drops the cached token so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn request_token(&self) -> Result<RedditToken, CoreError> {
        let exchange = self
            .oauth
            .exchange_client_credentials()
            .request_async(|request| send_token_request(&self.http, request));

        let response = match timeout(self.request_timeout, exchange).await {
            Ok(result) => result.map_err(token_error)?,
            Err(_) => {
                return Err(CoreError::Timeout {
                    seconds: self.request_timeout.as_secs().max(1),
                })
            }
        };

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        debug!("Obtained Reddit access token valid for {:?}", lifetime);

        Ok(RedditToken {
            access_token: response.access_token().secret().clone(),
            expires_at: Instant::now() + lifetime,
        })
    }
}

fn token_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CoreError {
    match error {
        // Transport problems are classified like any other network error.
        RequestTokenError::Request(e) => CoreError::Network(e),
        RequestTokenError::ServerResponse(response) => RedditApiError::AuthenticationFailed {
            reason: response.to_string(),
        }
        .into(),
        RequestTokenError::Parse(e, _) => RedditApiError::AuthenticationFailed {
            reason: format!("unexpected token response: {}", e),
        }
        .into(),
        RequestTokenError::Other(reason) => RedditApiError::AuthenticationFailed { reason }.into(),
    }
}

/// Sends an OAuth token request with our own HTTP client so Reddit sees the
/// configured User-Agent.
async fn send_token_request(
    http: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = http
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    let response = builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().to_owned();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_margin() {
        let fresh = RedditToken {
            access_token: "abc".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(!fresh.is_expired());

        let nearly_expired = RedditToken {
            access_token: "abc".to_string(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        assert!(nearly_expired.is_expired());
    }

    #[test]
    fn test_authenticator_builds_with_credentials() {
        let credentials = RedditCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            user_agent: "threadscope-test/0.1".to_string(),
        };
        let authenticator = Authenticator::new(
            &credentials,
            reqwest::Client::new(),
            Duration::from_secs(5),
            RetryConfig::reddit(),
        );
        assert!(authenticator.is_ok());
    }
}
