//! Authenticated API variant of the content origin.
//!
//! Same wire shape as the public endpoint, served from the API host behind
//! a bearer token. The token is read once at construction from the
//! environment variable named in `origin.token_env`; a missing token is a
//! configuration error surfaced at startup, not mid-run.

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::OriginConfig;
use crate::models::{RetrievalMode, TopReply};
use crate::origin::{
    get_json, parse_listing, parse_reply, ContentOrigin, ListQuery, OriginError, Page,
};
use crate::pacer::Pacer;

pub struct OauthOrigin {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_size: usize,
    max_retries: u32,
    pacer: Mutex<Pacer>,
}

impl OauthOrigin {
    pub fn new(config: &OriginConfig) -> anyhow::Result<Self> {
        let token_env = config
            .token_env
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("origin.token_env is required for the oauth variant"))?;
        let token = std::env::var(token_env)
            .with_context(|| format!("{} environment variable not set", token_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            page_size: config.page_size.min(100),
            max_retries: config.max_retries,
            pacer: Mutex::new(Pacer::from_millis(config.request_delay_ms)),
        })
    }
}

#[async_trait]
impl ContentOrigin for OauthOrigin {
    fn name(&self) -> &str {
        "oauth"
    }

    async fn list_page(&self, query: ListQuery<'_>) -> Result<Page, OriginError> {
        self.pacer.lock().await.pace().await;

        let ranking = match query.mode {
            RetrievalMode::Fresh => "new",
            RetrievalMode::Ranked => "top",
        };
        let url = format!("{}/r/{}/{}", self.base_url, query.source, ranking);

        let mut params: Vec<(&str, String)> = vec![
            ("t", query.window.key.as_str().to_string()),
            ("limit", self.page_size.to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = &query.after {
            params.push(("after", after.clone()));
        }

        let json = get_json(
            self.client
                .get(&url)
                .bearer_auth(&self.token)
                .query(&params),
            self.max_retries,
        )
        .await?;
        parse_listing(&json, query.source, query.score_floor)
    }

    async fn top_reply(
        &self,
        source: &str,
        post_id: &str,
    ) -> Result<Option<TopReply>, OriginError> {
        self.pacer.lock().await.pace().await;

        let url = format!("{}/r/{}/comments/{}", self.base_url, source, post_id);
        let json = get_json(
            self.client
                .get(&url)
                .bearer_auth(&self.token)
                .query(&[("limit", "1"), ("sort", "top"), ("raw_json", "1")]),
            self.max_retries,
        )
        .await?;

        Ok(parse_reply(&json))
    }
}
