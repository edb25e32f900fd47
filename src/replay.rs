//! Replay engine: re-delivers a recorded event stream against a target.
//!
//! Events are processed strictly in file order, one at a time, under one
//! of three timing modes (fixed delay, original timing, as fast as
//! possible). Every send passes through the retry executor; the rate
//! limiter gates admission in all modes.
//!
//! With no target configured the engine performs a dry run: the full
//! timing schedule is walked but nothing is delivered.

use crate::config::ReplayConfig;
use crate::delivery::{
    Deliver, DeliveryTarget, HttpDeliveryClient, RetryOutcome, deliver_with_retry,
};
use crate::event::EventRecord;
use crate::rate_limit::RateLimiter;
use chrono::{DateTime, Utc};
use std::io::BufRead;
use std::path::Path;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("reading events file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Outcome counts for one completed replay run.
///
/// Per-event delivery failures are counted, not raised: the run as a
/// whole succeeds as long as the schedule was walked to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub total: usize,
    pub delivered: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load events from a newline-delimited JSON source, preserving file
/// order. Blank lines are ignored; a line that fails to parse is skipped
/// with a warning and never aborts the load. A missing or unreadable
/// file is an error.
pub fn load_events(path: &Path) -> Result<Vec<EventRecord>, ReplayError> {
    let file = std::fs::File::open(path).map_err(|e| ReplayError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let reader = std::io::BufReader::new(file);

    let mut events = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ReplayError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(trimmed) {
            Ok(event) => events.push(event),
            Err(e) => {
                let preview: String = trimmed.chars().take(100).collect();
                warn!(
                    line = line_num + 1,
                    error = %e,
                    content = %preview,
                    "skipping invalid JSON line"
                );
            }
        }
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// ReplayEngine
// ---------------------------------------------------------------------------

pub struct ReplayEngine {
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig) -> Self {
        ReplayEngine { config }
    }

    /// Run the full configured schedule to completion.
    ///
    /// Errors only on setup failures (unreadable source); per-event
    /// delivery failures are contained and reflected in the summary.
    /// The connection pool, created lazily on the first send, is released
    /// when this returns — on every exit path.
    pub async fn replay(&self) -> Result<ReplaySummary, ReplayError> {
        let events = load_events(&self.config.events_file)?;
        if events.is_empty() {
            warn!("no events found to replay");
            return Ok(ReplaySummary::default());
        }

        let client = self
            .config
            .target_url
            .as_ref()
            .map(|base| HttpDeliveryClient::new(DeliveryTarget::ReplayBase(base.clone())));
        if client.is_none() {
            info!("no target configured; dry run (timing only)");
        }

        let mut limiter = RateLimiter::new(self.config.max_rps)?;
        info!(count = events.len(), "replaying events");

        let summary = self
            .run_schedule(&events, client.as_ref(), &mut limiter)
            .await;

        info!(
            total = summary.total,
            delivered = summary.delivered,
            failed = summary.failed,
            "replay complete"
        );
        Ok(summary)
    }

    async fn run_schedule<D: Deliver>(
        &self,
        events: &[EventRecord],
        client: Option<&D>,
        limiter: &mut RateLimiter,
    ) -> ReplaySummary {
        let total = events.len();
        let mut summary = ReplaySummary {
            total,
            ..ReplaySummary::default()
        };

        if self.config.fixed_delay > 0.0 {
            // Fixed delay between consecutive events.
            let delay = Duration::from_secs_f64(self.config.fixed_delay);
            for (i, event) in events.iter().enumerate() {
                let index = i + 1;
                self.send_one(client, event, index, total, &mut summary)
                    .await;
                if index < total {
                    limiter.admit().await;
                    sleep(delay).await;
                }
            }
        } else if self.config.replay_once {
            // Preserve the recorded inter-event gaps, scaled by the rate
            // multiplier. An unparseable timestamp yields no extra sleep.
            let mut prev_ts: Option<DateTime<Utc>> = None;
            for (i, event) in events.iter().enumerate() {
                let index = i + 1;
                let ts = event.parse_timestamp();
                if index > 1 {
                    if let (Some(prev), Some(cur)) = (prev_ts, ts) {
                        if let Ok(gap) = (cur - prev).to_std() {
                            let scaled = gap.div_f64(self.config.rate);
                            if scaled > Duration::ZERO {
                                sleep(scaled).await;
                            }
                        }
                    }
                    limiter.admit().await;
                }
                self.send_one(client, event, index, total, &mut summary)
                    .await;
                if ts.is_some() {
                    prev_ts = ts;
                }
            }
        } else {
            // As fast as possible; only the rate limiter paces sends.
            for (i, event) in events.iter().enumerate() {
                limiter.admit().await;
                self.send_one(client, event, i + 1, total, &mut summary)
                    .await;
            }
        }

        summary
    }

    async fn send_one<D: Deliver>(
        &self,
        client: Option<&D>,
        event: &EventRecord,
        index: usize,
        total: usize,
        summary: &mut ReplaySummary,
    ) {
        if is_progress_point(index, total) {
            info!(
                index,
                total,
                percent = index * 100 / total,
                method = %event.method,
                path = %event.path,
                "replaying"
            );
        }

        match client {
            Some(client) => match deliver_with_retry(client, event, self.config.max_retries).await
            {
                RetryOutcome::Delivered(_) => summary.delivered += 1,
                RetryOutcome::Failed => summary.failed += 1,
            },
            None => {
                if index <= 5 || index == total {
                    debug!(timestamp = %event.timestamp, "dry run: would send");
                }
            }
        }
    }
}

/// Progress is reported at the first event, the last event, and every
/// ~10% step of the total count.
fn is_progress_point(index: usize, total: usize) -> bool {
    index == 1 || index == total || index % std::cmp::max(1, total / 10) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_points_cover_first_last_and_ten_percent_steps() {
        // N=100: 1, every 10th, and 100.
        let points: Vec<usize> = (1..=100).filter(|i| is_progress_point(*i, 100)).collect();
        assert_eq!(
            points,
            vec![1, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
        );
    }

    #[test]
    fn progress_points_report_every_event_for_small_counts() {
        // total / 10 == 0 => step clamps to 1.
        for total in 1..=9 {
            for index in 1..=total {
                assert!(is_progress_point(index, total), "i={index} n={total}");
            }
        }
    }
}
