//! Cursor-style pagination over the upstream's relation-link headers.
//!
//! GitHub encodes named hyperlinks in the `Link` header as comma-separated
//! `<url>; rel="name"` tokens. Collections are walked by following the `next`
//! relation until it disappears; the `last` relation's page number doubles as
//! a cheap item count when paired with a one-item page size.

use crate::Result;
use crate::error::MetricsError;
use crate::github::client::GithubClient;
use ohno::IntoAppError;
use regex::Regex;
use reqwest::header::LINK;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::LazyLock;

const LOG_TARGET: &str = "     pages";

/// Number of items requested per page when walking a collection.
pub const PAGE_SIZE: u32 = 100;

/// Pattern to extract a single relation token from a Link header
static RELATION_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"<([^>]*)>;\s*rel="([^"]*)""#).expect("invalid regex"));

/// Pattern to extract the last page number from a Link header
static LAST_PAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"page=(\d+)>; rel=.last.").expect("invalid regex"));

/// Parse a relation-link header into a `rel -> url` map. Malformed tokens are
/// skipped.
#[must_use]
pub fn parse_link_header(value: &str) -> HashMap<String, String> {
    value
        .split(',')
        .filter_map(|token| RELATION_REGEX.captures(token).map(|caps| (caps[2].to_owned(), caps[1].to_owned())))
        .collect()
}

/// Extract the `last` relation's page number from a Link header, if any.
#[must_use]
pub fn last_page_number(link: &str) -> Option<u64> {
    LAST_PAGE_REGEX
        .captures(link)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Fetch a complete collection by following `next` relations from `first_page`
/// (a path and query relative to the API base) until none remains.
///
/// All-or-nothing: a non-2xx on any page fails the whole collection with
/// [`MetricsError::CollectionFetchFailed`] and pages already fetched are
/// discarded.
pub async fn fetch_collection<T>(client: &GithubClient, first_page: &str) -> Result<Vec<T>, MetricsError>
where
    T: DeserializeOwned,
{
    let mut items = Vec::new();
    let mut next_url: Option<String> = None;
    let mut pages = 0_u32;

    loop {
        let resp = match &next_url {
            Some(url) => client.get_url(url).await?,
            None => client.get(first_page).await?,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(MetricsError::CollectionFetchFailed { status: status.as_u16() });
        }

        // Grab the next link before the body consumes the response.
        let next = resp
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(|link| parse_link_header(link).remove("next"));

        let mut page: Vec<T> = resp
            .json()
            .await
            .into_app_err_with(|| format!("could not parse collection page for '{first_page}'"))?;
        items.append(&mut page);
        pages += 1;

        match next {
            Some(url) => next_url = Some(url),
            None => break,
        }
    }

    log::debug!(target: LOG_TARGET, "fetched {} items across {pages} pages for '{first_page}'", items.len());

    Ok(items)
}
