//! Scheduler orchestrator.
//!
//! Drives one harvest invocation end to end: load the checkpoint, seed the
//! known-ID set from the store, walk each source's current window under the
//! daily budget, enrich whatever is new, append it to the store, and commit
//! the checkpoint once at the very end.
//!
//! Per source the state machine is `Draining(window_index)`; the index
//! advances only when a full pass over the current window yields zero new
//! posts, and once it moves past the schedule end the source is considered
//! backfilled — later runs walk only the freshest window, with no further
//! advancement tracked.
//!
//! Sources are processed sequentially by design: the origin and the AI
//! provider are both globally rate-limited, so parallelism would only move
//! the bottleneck into backoff storms. The unit of atomicity is the whole
//! invocation — the checkpoint commits only on clean completion, so a
//! mid-run crash redoes some work but never corrupts recorded progress.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointFile;
use crate::config::Config;
use crate::enrich::Enricher;
use crate::models::{Post, RunSummary};
use crate::origin::ContentOrigin;
use crate::store::PostStore;
use crate::walker;

/// Options for one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop before enrichment and persistence; the checkpoint is not saved.
    pub dry_run: bool,
    /// Ignore the once-per-day re-entrancy guard.
    pub force: bool,
}

/// One harvest invocation's collaborators, injected at construction so
/// tests can substitute doubles without process-level state.
pub struct Scheduler {
    config: Config,
    origin: Box<dyn ContentOrigin>,
    store: Box<dyn PostStore>,
    enricher: Enricher,
    checkpoint_file: CheckpointFile,
}

impl Scheduler {
    pub fn new(
        config: Config,
        origin: Box<dyn ContentOrigin>,
        store: Box<dyn PostStore>,
        enricher: Enricher,
        checkpoint_file: CheckpointFile,
    ) -> Self {
        Self {
            config,
            origin,
            store,
            enricher,
            checkpoint_file,
        }
    }

    /// Run the scheduler once for `today`.
    pub async fn run(&mut self, today: NaiveDate, options: RunOptions) -> Result<RunSummary> {
        let mut checkpoint = self.checkpoint_file.load()?;
        let today_str = today.format("%Y-%m-%d").to_string();

        if !options.force && checkpoint.last_run_date.as_deref() == Some(today_str.as_str()) {
            info!(date = %today_str, "already ran today; skipping");
            return Ok(RunSummary {
                already_ran: true,
                ..Default::default()
            });
        }

        info!(
            date = %today_str,
            origin = self.origin.name(),
            budget = self.config.harvest.max_per_run,
            "starting harvest run"
        );

        // Seed the dedup oracle. Fail soft: duplicate risk beats a dead run.
        let persisted = match self.store.known_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "known-ID listing unavailable; continuing with an empty set");
                HashSet::new()
            }
        };
        info!(known = persisted.len(), "seeded known-ID set from store");
        let mut known = persisted.clone();

        let schedule = self.config.harvest.schedule();
        let budget = self.config.harvest.max_per_run;
        let mut summary = RunSummary::default();
        let mut harvested: Vec<Post> = Vec::new();

        for source in &self.config.harvest.sources {
            let progress = checkpoint.sources.entry(source.clone()).or_default();
            let mut window_index = progress.window_index;
            let backfilled = window_index >= schedule.len();
            let mut fetched_today = 0usize;

            if backfilled {
                // Steady-state daily mode: freshest window only.
                match walker::walk(
                    self.origin.as_ref(),
                    &self.config.harvest,
                    source,
                    schedule.freshest(),
                    true,
                    budget,
                    &mut known,
                )
                .await
                {
                    Ok(outcome) => {
                        summary.skipped_duplicates += outcome.skipped_duplicates;
                        fetched_today += outcome.posts.len();
                        harvested.extend(outcome.posts);
                    }
                    Err(err) => {
                        warn!(source = %source, error = %err, "daily pass abandoned for this run");
                        summary.errors += 1;
                    }
                }
            } else {
                while fetched_today < budget && window_index < schedule.len() {
                    let Some(window) = schedule.get(window_index) else {
                        break;
                    };
                    let fresh = window_index == 0;
                    let remaining = budget - fetched_today;

                    match walker::walk(
                        self.origin.as_ref(),
                        &self.config.harvest,
                        source,
                        window,
                        fresh,
                        remaining,
                        &mut known,
                    )
                    .await
                    {
                        Ok(outcome) => {
                            summary.skipped_duplicates += outcome.skipped_duplicates;
                            if outcome.posts.is_empty() {
                                // True exhaustion, not budget exhaustion:
                                // advance to the next older window.
                                debug!(
                                    source = %source,
                                    window = window.key.as_str(),
                                    "window exhausted; advancing"
                                );
                                window_index += 1;
                            } else {
                                fetched_today += outcome.posts.len();
                                harvested.extend(outcome.posts);
                            }
                        }
                        Err(err) => {
                            // Transport trouble: abandon this source for the
                            // pass without advancing the window.
                            warn!(
                                source = %source,
                                window = window.key.as_str(),
                                error = %err,
                                "window pass abandoned for this run"
                            );
                            summary.errors += 1;
                            break;
                        }
                    }
                }
            }

            progress.window_index = window_index;
            progress.fetched += fetched_today as u64;
            info!(source = %source, fetched = fetched_today, window_index, "source pass complete");
        }

        summary.fetched = harvested.len() as u64;

        if options.dry_run {
            info!(
                posts = harvested.len(),
                "dry run; skipping enrichment, persistence, and checkpoint save"
            );
            return Ok(summary);
        }

        if !harvested.is_empty() {
            info!(posts = harvested.len(), "enriching new posts");
            for post in harvested.iter_mut() {
                self.enricher.enrich(post).await;
            }

            if self.store.is_configured() {
                for post in &harvested {
                    if persisted.contains(&post.id) {
                        summary.skipped_at_push += 1;
                        continue;
                    }
                    match self.store.append(post).await {
                        Ok(()) => summary.pushed += 1,
                        Err(err) => {
                            warn!(post = %post.id, error = %err, "append failed");
                            summary.errors += 1;
                        }
                    }
                }
            } else {
                warn!("store not configured; enriched posts will be re-fetched next run");
            }
        }

        checkpoint.last_run_date = Some(today_str);
        checkpoint.total_fetched += summary.fetched;
        self.checkpoint_file.save(&checkpoint)?;

        info!(
            fetched = summary.fetched,
            skipped = summary.skipped_duplicates,
            pushed = summary.pushed,
            errors = summary.errors,
            total_all_time = checkpoint.total_fetched,
            "harvest run complete"
        );

        Ok(summary)
    }
}
