//! Authenticated/unauthenticated HTTP access to the GitHub REST and GraphQL
//! endpoints with uniform header injection.

use crate::Result;
use core::time::Duration;
use ohno::IntoAppError;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

const LOG_TARGET: &str = "    github";

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const USER_AGENT: &str = "gh-metrics";

/// Uniform bound on every outbound call. The upstream has no such bound itself;
/// without this a stuck call would hold an aggregation open indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub API client.
///
/// Every request carries the API media-type accept header, a fixed user agent,
/// and `Cache-Control: no-cache` so intermediaries never serve a stale body
/// across aggregation cycles. When an access token is configured it is attached
/// as a sensitive bearer header; without one the client still works, but
/// [`GithubClient::graphql`] reports nothing and callers are expected to skip
/// credential-gated features rather than fail.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_base: Url,
    graphql_url: Url,
    has_token: bool,
}

impl GithubClient {
    /// Create a client against the public GitHub endpoints.
    pub fn new(token: Option<&str>) -> Result<Self> {
        Self::with_base_urls(token, DEFAULT_API_BASE, DEFAULT_GRAPHQL_URL)
    }

    /// Create a client against alternate endpoints. Tests point this at a mock
    /// server.
    pub fn with_base_urls(token: Option<&str>, api_base: &str, graphql_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        _ = headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Some(t) = token {
            let mut auth_val = HeaderValue::from_str(&format!("Bearer {t}"))?;
            auth_val.set_sensitive(true);
            _ = headers.insert(AUTHORIZATION, auth_val);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .into_app_err("unable to create HTTP client")?;

        Ok(Self {
            http,
            api_base: Url::parse(api_base)?,
            graphql_url: Url::parse(graphql_url)?,
            has_token: token.is_some(),
        })
    }

    /// Whether an access credential was configured. Credential-gated features
    /// (the contribution calendar, the PR search) are skipped without one.
    #[must_use]
    pub const fn has_token(&self) -> bool {
        self.has_token
    }

    /// GET a path (with optional query) relative to the API base.
    ///
    /// A network-level failure is an error; a non-2xx response is not. Callers
    /// inspect the status themselves.
    pub async fn get(&self, path_and_query: &str) -> Result<Response> {
        let url = self.api_base.join(path_and_query)?;
        self.get_url(url.as_str()).await
    }

    /// GET an absolute URL, e.g. one taken from a pagination relation link.
    pub async fn get_url(&self, url: &str) -> Result<Response> {
        log::debug!(target: LOG_TARGET, "GET {url}");

        self.http
            .get(url)
            .send()
            .await
            .into_app_err_with(|| format!("upstream unavailable for '{url}'"))
    }

    /// Run a GraphQL query and return its `data` object.
    ///
    /// GraphQL requires a credential; without one, and on any transport
    /// failure, non-2xx status, or populated `errors` array, this yields `None`
    /// so callers degrade instead of failing the aggregation.
    pub async fn graphql<T>(&self, query: &str, variables: serde_json::Value) -> Option<T>
    where
        T: DeserializeOwned,
    {
        if !self.has_token {
            return None;
        }

        let body = serde_json::json!({ "query": query, "variables": variables });

        let resp = match self.http.post(self.graphql_url.clone()).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "GraphQL request failed: {e:#}");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            log::warn!(target: LOG_TARGET, "GraphQL query returned status {status}");
            return None;
        }

        let envelope: GraphQlEnvelope<T> = match resp.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!(target: LOG_TARGET, "could not parse GraphQL response: {e:#}");
                return None;
            }
        };

        if let Some(errors) = &envelope.errors
            && !errors.is_empty()
        {
            log::warn!(target: LOG_TARGET, "GraphQL errors: {errors:?}");
            return None;
        }

        envelope.data
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<serde_json::Value>>,
}
