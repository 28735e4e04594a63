//! Historical-archive variant of the content origin.
//!
//! Queries an archive search API over an epoch range derived from the
//! window, paginating backwards in time with a `created_utc` cursor. The
//! archive keeps no thread structure, so `top_reply` always yields `None`
//! and archived posts are persisted without a reply excerpt.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::OriginConfig;
use crate::models::TopReply;
use crate::origin::{get_json, post_from_value, ContentOrigin, ListQuery, OriginError, Page};
use crate::pacer::Pacer;

pub struct ArchiveOrigin {
    client: reqwest::Client,
    base_url: String,
    page_size: usize,
    max_retries: u32,
    pacer: Mutex<Pacer>,
}

impl ArchiveOrigin {
    pub fn new(config: &OriginConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size.min(100),
            max_retries: config.max_retries,
            pacer: Mutex::new(Pacer::from_millis(config.request_delay_ms)),
        })
    }
}

#[async_trait]
impl ContentOrigin for ArchiveOrigin {
    fn name(&self) -> &str {
        "archive"
    }

    async fn list_page(&self, query: ListQuery<'_>) -> Result<Page, OriginError> {
        self.pacer.lock().await.pace().await;

        let now = chrono::Utc::now().timestamp();
        let since = query
            .window
            .key
            .span_secs()
            .map(|span| now - span)
            .unwrap_or(0);
        let until = match &query.after {
            Some(token) => token
                .parse::<i64>()
                .map_err(|_| OriginError::Malformed(format!("bad archive cursor: {}", token)))?,
            None => now,
        };

        let url = format!("{}/api/search/submission", self.base_url);
        let json = get_json(
            self.client.get(&url).query(&[
                ("subreddit", query.source.to_string()),
                ("size", self.page_size.to_string()),
                ("sort", "desc".to_string()),
                ("since", since.to_string()),
                ("until", until.to_string()),
            ]),
            self.max_retries,
        )
        .await?;

        let records = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| OriginError::Malformed("missing data array".to_string()))?;

        let oldest = records
            .iter()
            .filter_map(|r| r.get("created_utc").and_then(|v| v.as_f64()))
            .map(|v| v as i64)
            .min();

        let mut posts = Vec::new();
        for record in records {
            if let Some(post) = post_from_value(record, query.source) {
                if post.score >= query.score_floor {
                    posts.push(post);
                }
            }
        }

        // A full page means there may be older records; step the cursor
        // just past the oldest one returned.
        let after = match oldest {
            Some(oldest) if records.len() >= self.page_size && oldest > since => {
                Some((oldest - 1).to_string())
            }
            _ => None,
        };

        Ok(Page { posts, after })
    }

    async fn top_reply(
        &self,
        _source: &str,
        _post_id: &str,
    ) -> Result<Option<TopReply>, OriginError> {
        Ok(None)
    }
}
