//! Progress observation for long-running exports.
//!
//! Fetch and merge loops never render anything themselves: they emit one
//! [`ProgressEvent`] per completed unit of work (page, enrichment batch, parent,
//! flattening pass) to a [`ProgressObserver`]. Tests use [`NoopObserver`]; the CLI
//! plugs in a progress bar; [`LoggingObserver`] emits periodic `[PROGRESS]` lines.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::EntityKind;

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
const MIN_EXPORT_DURATION: Duration = Duration::from_secs(10);

/// One completed unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A listing page was received
    PageFetched {
        /// Entity being exported
        entity: EntityKind,
        /// 1-based page number
        page: u32,
        /// Entities on the page
        items: usize,
        /// Total entity count, when advertised
        total_hint: Option<u64>,
    },
    /// One id-filter chunk of a sub-resource was walked
    EnrichmentBatch {
        /// Sub-resource name
        resource: &'static str,
        /// 1-based chunk number
        chunk: usize,
        /// Number of chunks for this sub-resource
        chunks: usize,
        /// Sub-records received for the chunk
        records: usize,
    },
    /// An optional sub-resource was unavailable and skipped
    EnrichmentDegraded {
        /// Sub-resource name
        resource: &'static str,
        /// HTTP status (403 or 404)
        status: u16,
    },
    /// One parent's per-entity supplemental fetch finished
    ParentEnriched {
        /// Parent identifier
        id: i64,
        /// Parents finished so far
        completed: usize,
        /// Parents scheduled
        total: usize,
    },
    /// Flattening finished for the whole run
    RecordsFlattened {
        /// Flat records produced
        count: usize,
    },
}

/// Receives progress events; must be cheap and non-blocking
pub trait ProgressObserver: Send + Sync {
    /// Called once per completed unit of work
    fn on_event(&self, event: &ProgressEvent);
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Observer that logs periodic `[PROGRESS]` lines through `tracing`
#[derive(Debug)]
pub struct LoggingObserver {
    state: Mutex<ProgressState>,
}

impl LoggingObserver {
    /// Create an observer for one export run
    pub fn new(entity: EntityKind) -> Self {
        Self {
            state: Mutex::new(ProgressState::new(None, entity)),
        }
    }

    /// Override the minimum interval between time-based updates
    pub fn with_update_interval(self, interval: Duration) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.update_interval = interval;
        }
        self
    }
}

impl ProgressObserver for LoggingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PageFetched {
                page,
                items,
                total_hint,
                ..
            } => {
                let Ok(mut state) = self.state.lock() else {
                    return;
                };
                if state.total_expected.is_none() {
                    state.total_expected = *total_hint;
                }
                state.set_phase(Some(format!("page {page}")));
                state.update(*items as u64);
                if state.should_emit_update() {
                    info!("{}", state.format_progress());
                    state.mark_emitted();
                }
            }
            ProgressEvent::EnrichmentBatch {
                resource,
                chunk,
                chunks,
                records,
            } => {
                debug!(resource, chunk, chunks, records, "Enrichment chunk fetched");
            }
            ProgressEvent::EnrichmentDegraded { resource, status } => {
                warn!(
                    resource,
                    status, "Optional sub-resource unavailable, continuing with inline data"
                );
            }
            ProgressEvent::ParentEnriched {
                id,
                completed,
                total,
            } => {
                if completed == total || completed % 100 == 0 {
                    info!("[PROGRESS] Enriched {completed}/{total} parents");
                } else {
                    debug!(id, completed, total, "Parent enriched");
                }
            }
            ProgressEvent::RecordsFlattened { count } => {
                info!(count, "Records flattened");
            }
        }
    }
}

/// Progress tracking state for one export run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Number of entities fetched so far.
    pub items_fetched: u64,
    /// Total expected entities (if advertised).
    pub total_expected: Option<u64>,
    /// Timestamp when the export started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based progress updates.
    pub update_interval: Duration,
    /// Current fetch rate (entities per second).
    pub current_rate: f64,
    /// Entity being exported.
    pub entity: EntityKind,
    /// Current phase label (e.g. "page 3").
    pub current_phase: Option<String>,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a new progress state with default intervals.
    pub fn new(total_expected: Option<u64>, entity: EntityKind) -> Self {
        let now = Instant::now();
        Self {
            items_fetched: 0,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            entity,
            current_phase: None,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Account for newly fetched entities.
    pub fn update(&mut self, new_items: u64) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        self.items_fetched = self.items_fetched.saturating_add(new_items);
        if elapsed > 0.0 {
            self.current_rate = self.items_fetched as f64 / elapsed;
        }
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.items_fetched == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_EXPORT_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Set descriptive phase label.
    pub fn set_phase<S: Into<String>>(&mut self, phase: Option<S>) {
        self.current_phase = phase.map(|s| s.into());
    }

    /// Completion percentage (0-100), when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some(((self.items_fetched as f64 / total as f64) * 100.0).min(100.0))
    }

    /// Estimate remaining time from the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.items_fetched);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Fetched {} {}",
            self.items_fetched,
            self.entity.as_str()
        )];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if let Some(phase) = &self.current_phase {
            parts.push(format!("({phase})"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!(
                "at {:.0} {}/sec",
                self.current_rate,
                self.entity.as_str()
            ));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
