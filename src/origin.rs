//! Content origin abstraction.
//!
//! One polymorphic contract over the three interchangeable transports that
//! can list posts for a source:
//! - **[`origin_public`](crate::origin_public)** — unauthenticated read-only
//!   JSON endpoint of the forum site.
//! - **[`origin_oauth`](crate::origin_oauth)** — the authenticated API host,
//!   same wire shape behind a bearer token.
//! - **[`origin_archive`](crate::origin_archive)** — a historical-archive
//!   search API for deep backfill.
//!
//! The walker depends only on this contract, never on a specific variant;
//! the variant is selected at configuration time via [`from_config`].
//!
//! All variants signal rate limiting distinguishably
//! ([`OriginError::RateLimited`]) and retry 429/5xx internally with
//! exponential backoff before surfacing an error.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::OriginConfig;
use crate::models::{truncate_chars, Post, RetrievalMode, TopReply, Window};
use crate::origin_archive::ArchiveOrigin;
use crate::origin_oauth::OauthOrigin;
use crate::origin_public::PublicOrigin;

/// Body text is capped at discovery; replies tighter still.
pub const MAX_BODY_CHARS: usize = 2_000;
pub const MAX_REPLY_CHARS: usize = 1_000;

/// Errors surfaced by origin adapters. Rate limiting is distinguishable
/// from transport failures so callers can apply the right policy.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin rate limited (HTTP 429)")]
    RateLimited,
    #[error("origin transport error: {0}")]
    Transport(String),
    #[error("unexpected origin payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for OriginError {
    fn from(err: reqwest::Error) -> Self {
        OriginError::Transport(err.to_string())
    }
}

/// One listing request against a source and window.
#[derive(Debug, Clone)]
pub struct ListQuery<'a> {
    pub source: &'a str,
    pub window: &'a Window,
    pub mode: RetrievalMode,
    pub score_floor: i64,
    /// Pagination token from the previous page, if any.
    pub after: Option<String>,
}

/// One page of candidates plus the token for the next page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,
    pub after: Option<String>,
}

/// A transport that can list posts for a source and fetch a post's
/// single highest-ranked reply.
#[async_trait]
pub trait ContentOrigin: Send + Sync {
    /// Variant name, used in logs.
    fn name(&self) -> &str;

    /// Fetch one page of candidates, already filtered by `score_floor`.
    async fn list_page(&self, query: ListQuery<'_>) -> Result<Page, OriginError>;

    /// Fetch the top reply for a post, `None` when the post has no replies
    /// or the transport has no reply endpoint.
    async fn top_reply(&self, source: &str, post_id: &str)
        -> Result<Option<TopReply>, OriginError>;
}

/// Construct the configured origin variant.
pub fn from_config(config: &OriginConfig) -> anyhow::Result<Box<dyn ContentOrigin>> {
    match config.variant.as_str() {
        "public" => Ok(Box::new(PublicOrigin::new(config)?)),
        "oauth" => Ok(Box::new(OauthOrigin::new(config)?)),
        "archive" => Ok(Box::new(ArchiveOrigin::new(config)?)),
        other => anyhow::bail!(
            "Unknown origin variant: '{}'. Available: public, oauth, archive",
            other
        ),
    }
}

/// Send a GET request, retrying 429 and 5xx with exponential backoff.
///
/// Retry strategy mirrors the rest of the pipeline:
/// - HTTP 429 or 5xx → retry with backoff: 1s, 2s, 4s, ...
/// - other HTTP 4xx → fail immediately
/// - network error → retry
///
/// If retries exhaust on a 429, [`OriginError::RateLimited`] is returned so
/// the caller can tell capacity pressure from a broken transport.
pub(crate) async fn get_json(
    request: reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<Value, OriginError> {
    let mut last_err = OriginError::Transport("request not sent".to_string());

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let req = request
            .try_clone()
            .ok_or_else(|| OriginError::Transport("request not cloneable".to_string()))?;

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| OriginError::Malformed(e.to_string()));
                }

                if status.as_u16() == 429 {
                    last_err = OriginError::RateLimited;
                    continue;
                }
                if status.is_server_error() {
                    last_err = OriginError::Transport(format!("origin HTTP {}", status));
                    continue;
                }

                return Err(OriginError::Transport(format!("origin HTTP {}", status)));
            }
            Err(e) => {
                last_err = OriginError::Transport(e.to_string());
                continue;
            }
        }
    }

    Err(last_err)
}

/// Parse a listing page shared by the public and oauth variants.
///
/// The wire shape is `data.children[].data` plus a `data.after` pagination
/// token. Candidates below `score_floor` are dropped here, at the origin
/// boundary, before the walker sees them.
pub(crate) fn parse_listing(
    json: &Value,
    source: &str,
    score_floor: i64,
) -> Result<Page, OriginError> {
    let children = json
        .pointer("/data/children")
        .and_then(|c| c.as_array())
        .ok_or_else(|| OriginError::Malformed("missing data.children array".to_string()))?;

    let mut posts = Vec::new();
    for child in children {
        if let Some(data) = child.get("data") {
            if let Some(post) = post_from_value(data, source) {
                if post.score >= score_floor {
                    posts.push(post);
                }
            }
        }
    }

    let after = json
        .pointer("/data/after")
        .and_then(|a| a.as_str())
        .map(|a| a.to_string());

    Ok(Page { posts, after })
}

/// Map one raw listing record into a [`Post`]. Records without an ID are
/// dropped; everything else degrades to defaults.
pub(crate) fn post_from_value(data: &Value, source: &str) -> Option<Post> {
    let id = data.get("id")?.as_str()?.to_string();
    let created_utc = data
        .get("created_utc")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0) as i64;

    let url = match data.get("permalink").and_then(|v| v.as_str()) {
        Some(permalink) => format!("https://reddit.com{}", permalink),
        None => data
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    };

    Some(Post {
        id,
        source: source.to_string(),
        title: data
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        body: truncate_chars(
            data.get("selftext")
                .and_then(|v| v.as_str())
                .unwrap_or_default(),
            MAX_BODY_CHARS,
        )
        .to_string(),
        score: data.get("score").and_then(|v| v.as_i64()).unwrap_or(0),
        num_comments: data
            .get("num_comments")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        created_utc,
        created_at: human_timestamp(created_utc),
        author: data
            .get("author")
            .and_then(|v| v.as_str())
            .map(|a| a.to_string()),
        url,
        upvote_ratio: data
            .get("upvote_ratio")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
        top_reply: None,
        enrichment: None,
        facts: None,
    })
}

/// Parse a reply thread response: `[post, comments]`, where the first
/// comment of kind `t1` is the top-ranked reply.
pub(crate) fn parse_reply(json: &Value) -> Option<TopReply> {
    let comments = json
        .get(1)?
        .pointer("/data/children")?
        .as_array()?;
    let first = comments.first()?;
    if first.get("kind")?.as_str()? != "t1" {
        return None;
    }
    let data = first.get("data")?;

    Some(TopReply {
        id: data.get("id")?.as_str()?.to_string(),
        body: truncate_chars(
            data.get("body").and_then(|v| v.as_str()).unwrap_or_default(),
            MAX_REPLY_CHARS,
        )
        .to_string(),
        score: data.get("score").and_then(|v| v.as_i64()).unwrap_or(0),
        author: data
            .get("author")
            .and_then(|v| v.as_str())
            .map(|a| a.to_string()),
    })
}

/// Derived human-readable timestamp, `None` when the epoch is missing.
pub(crate) fn human_timestamp(created_utc: i64) -> Option<String> {
    if created_utc == 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(created_utc, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing_fixture() -> Value {
        json!({
            "data": {
                "children": [
                    { "data": {
                        "id": "abc1",
                        "title": "Quel ETF pour un PEA ?",
                        "selftext": "Je débute en bourse.",
                        "score": 45,
                        "num_comments": 12,
                        "created_utc": 1700000000.0,
                        "permalink": "/r/vosfinances/comments/abc1/etf/",
                        "author": "alice",
                        "upvote_ratio": 0.97
                    }},
                    { "data": {
                        "id": "low1",
                        "title": "Petit score",
                        "selftext": "",
                        "score": 3,
                        "created_utc": 1700000100.0,
                        "author": "bob"
                    }},
                    { "data": { "title": "pas d'identifiant", "score": 99 } }
                ],
                "after": "t3_abc1"
            }
        })
    }

    #[test]
    fn listing_filters_by_score_floor() {
        let page = parse_listing(&listing_fixture(), "vosfinances", 10).unwrap();
        assert_eq!(page.posts.len(), 1);
        assert_eq!(page.posts[0].id, "abc1");
        assert_eq!(page.posts[0].source, "vosfinances");
        assert_eq!(page.posts[0].url, "https://reddit.com/r/vosfinances/comments/abc1/etf/");
        assert_eq!(page.after.as_deref(), Some("t3_abc1"));
    }

    #[test]
    fn listing_with_lower_floor_keeps_fresh_posts() {
        let page = parse_listing(&listing_fixture(), "vosfinances", 2).unwrap();
        assert_eq!(page.posts.len(), 2);
    }

    #[test]
    fn malformed_listing_is_an_error() {
        let err = parse_listing(&json!({"data": {}}), "vosfinances", 0).unwrap_err();
        assert!(matches!(err, OriginError::Malformed(_)));
    }

    #[test]
    fn body_is_capped_at_discovery() {
        let long_body = "x".repeat(5_000);
        let data = json!({ "id": "big1", "selftext": long_body, "score": 50 });
        let post = post_from_value(&data, "vosfinances").unwrap();
        assert_eq!(post.body.chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn reply_thread_yields_top_comment() {
        let json = json!([
            { "data": {} },
            { "data": { "children": [
                { "kind": "t1", "data": {
                    "id": "rep1",
                    "body": "CW8 est le classique.",
                    "score": 30,
                    "author": "carol"
                }}
            ]}}
        ]);
        let reply = parse_reply(&json).unwrap();
        assert_eq!(reply.id, "rep1");
        assert_eq!(reply.score, 30);
    }

    #[test]
    fn non_comment_kind_is_no_reply() {
        let json = json!([
            { "data": {} },
            { "data": { "children": [ { "kind": "more", "data": {} } ] } }
        ]);
        assert!(parse_reply(&json).is_none());
    }

    #[test]
    fn epoch_zero_has_no_human_timestamp() {
        assert_eq!(human_timestamp(0), None);
        assert_eq!(
            human_timestamp(1700000000).as_deref(),
            Some("2023-11-14 22:13:20")
        );
    }
}
