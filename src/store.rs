//! Remote table store adapter.
//!
//! The persistence store is a REST table API (NocoDB-style): one endpoint
//! lists existing records with `limit`/`offset` pagination, another appends
//! a record. The core only needs two things from it: the set of post IDs it
//! already holds (the deduplication oracle) and an append operation. Posts
//! are flattened to scalar columns at the boundary — nested reply truncated,
//! tags joined, extraction serialized to a JSON text blob.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::{truncate_chars, Post};

/// Body column limit in the remote table.
const MAX_STORED_BODY_CHARS: usize = 5_000;
const MAX_STORED_REPLY_CHARS: usize = 1_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store not configured (missing token or table id)")]
    NotConfigured,
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store HTTP {0}")]
    Http(u16),
    #[error("unexpected store payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

/// The persistence collaborator as the scheduler sees it.
#[async_trait]
pub trait PostStore: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Every post ID the store already holds. Pages through the whole table.
    async fn known_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Append one enriched post. The store is append-only; duplicates are
    /// the caller's responsibility.
    async fn append(&self, post: &Post) -> Result<(), StoreError>;
}

/// HTTP implementation of [`PostStore`].
pub struct TableStore {
    client: reqwest::Client,
    base_url: String,
    table_id: String,
    token: Option<String>,
    page_size: usize,
}

impl TableStore {
    pub fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            table_id: config.table_id.clone(),
            token,
            page_size: config.page_size,
        })
    }

    fn records_url(&self) -> String {
        format!("{}/api/v2/tables/{}/records", self.base_url, self.table_id)
    }

    fn credentials(&self) -> Result<&str, StoreError> {
        if self.table_id.is_empty() {
            return Err(StoreError::NotConfigured);
        }
        self.token.as_deref().ok_or(StoreError::NotConfigured)
    }
}

#[async_trait]
impl PostStore for TableStore {
    fn is_configured(&self) -> bool {
        self.token.is_some() && !self.table_id.is_empty()
    }

    async fn known_ids(&self) -> Result<HashSet<String>, StoreError> {
        let token = self.credentials()?;

        let mut ids = HashSet::new();
        let mut offset = 0usize;

        loop {
            let response = self
                .client
                .get(self.records_url())
                .header("xc-token", token)
                .query(&[
                    ("fields", "post_id".to_string()),
                    ("limit", self.page_size.to_string()),
                    ("offset", offset.to_string()),
                ])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(StoreError::Http(status.as_u16()));
            }

            let json: Value = response
                .json()
                .await
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            let records = json
                .get("list")
                .and_then(|l| l.as_array())
                .ok_or_else(|| StoreError::Malformed("missing list array".to_string()))?;

            if records.is_empty() {
                break;
            }
            for record in records {
                if let Some(id) = record.get("post_id").and_then(|v| v.as_str()) {
                    ids.insert(id.to_string());
                }
            }
            if records.len() < self.page_size {
                break;
            }
            offset += self.page_size;
        }

        Ok(ids)
    }

    async fn append(&self, post: &Post) -> Result<(), StoreError> {
        let token = self.credentials()?;

        let response = self
            .client
            .post(self.records_url())
            .header("xc-token", token)
            .json(&flatten_record(post))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Http(status.as_u16()));
        }
        Ok(())
    }
}

/// Flatten a post plus its enrichment into the remote table's column shape.
pub fn flatten_record(post: &Post) -> Value {
    let enrichment = post.enrichment.as_ref();
    let facts = post.facts.as_ref();

    let extracted_json = facts
        .and_then(|f| serde_json::to_string(f).ok())
        .unwrap_or_default();
    let montant_max = facts.and_then(|f| f.amounts.first().copied());

    json!({
        "post_id": post.id,
        "source": post.source,
        "title": post.title,
        "body": truncate_chars(&post.body, MAX_STORED_BODY_CHARS),
        "score": post.score,
        "num_comments": post.num_comments,
        "created_at": post.created_at,
        "url": post.url,
        "author": post.author,
        "upvote_ratio": post.upvote_ratio,
        "category": enrichment.map(|e| e.category.as_str()).unwrap_or("Autre"),
        "tags": enrichment.map(|e| e.tags.join(", ")).unwrap_or_default(),
        "summary": enrichment.map(|e| e.summary.as_str()).unwrap_or(""),
        "consensus": enrichment.map(|e| e.consensus.as_str()).unwrap_or(""),
        "key_advice": enrichment.map(|e| e.key_advice.as_str()).unwrap_or(""),
        "top_reply": post
            .top_reply
            .as_ref()
            .map(|r| truncate_chars(&r.body, MAX_STORED_REPLY_CHARS))
            .unwrap_or(""),
        "reply_score": post.top_reply.as_ref().map(|r| r.score).unwrap_or(0),
        "extracted_data": extracted_json,
        "patrimoine": facts.and_then(|f| f.patrimoine),
        "revenus_annuels": facts.and_then(|f| f.revenus_annuels),
        "age_auteur": facts.and_then(|f| f.age),
        "montant_max": montant_max,
    })
}
