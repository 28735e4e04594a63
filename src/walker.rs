//! Windowed source walker.
//!
//! Pulls candidates for one source and one window from the content origin,
//! drops everything the known-ID set has already seen, and stops as soon as
//! `max_items` new posts are accepted or the origin runs out of pages.
//! Accepted IDs are inserted into the known set immediately, so a second
//! pass over an unchanged window yields nothing.
//!
//! Each accepted post triggers one secondary fetch of its top-ranked reply;
//! a reply failure is logged and the post is yielded without one. Request
//! pacing lives inside the origin adapters, so the walker stays pure
//! sequencing logic.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::HarvestConfig;
use crate::models::{Post, RetrievalMode, Window};
use crate::origin::{ContentOrigin, ListQuery, OriginError};

/// What one window pass produced.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub posts: Vec<Post>,
    pub skipped_duplicates: u64,
}

/// Walk one window of one source, accepting at most `max_items` new posts.
pub async fn walk(
    origin: &dyn ContentOrigin,
    harvest: &HarvestConfig,
    source: &str,
    window: &Window,
    fresh: bool,
    max_items: usize,
    known: &mut HashSet<String>,
) -> Result<WalkOutcome, OriginError> {
    let (mode, score_floor) = if fresh {
        (RetrievalMode::Fresh, harvest.min_score_fresh)
    } else {
        (RetrievalMode::Ranked, harvest.min_score)
    };

    let mut outcome = WalkOutcome::default();
    let mut after: Option<String> = None;

    loop {
        let page = origin
            .list_page(ListQuery {
                source,
                window,
                mode,
                score_floor,
                after: after.clone(),
            })
            .await?;

        for mut post in page.posts {
            if known.contains(&post.id) {
                outcome.skipped_duplicates += 1;
                continue;
            }

            match origin.top_reply(source, &post.id).await {
                Ok(reply) => post.top_reply = reply,
                Err(err) => {
                    warn!(
                        source,
                        post = %post.id,
                        error = %err,
                        "top reply fetch failed; keeping post without reply"
                    );
                }
            }

            known.insert(post.id.clone());
            outcome.posts.push(post);

            if outcome.posts.len() >= max_items {
                debug!(source, window = window.key.as_str(), "item budget reached");
                return Ok(outcome);
            }
        }

        match page.after {
            Some(token) => after = Some(token),
            None => break,
        }
    }

    Ok(outcome)
}
