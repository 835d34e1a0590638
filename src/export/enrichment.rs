//! Sub-resource enrichment
//!
//! Parents whose inline sub-lists are truncated get the missing data through one of
//! two patterns:
//! - Batched id filter: ids are chunked, each chunk is walked as its own listing
//!   (`customer_id:in=1,2,3`) and the union is grouped by the parent foreign key
//! - Per-entity fan-out: one call per parent over a bounded worker pool, results
//!   re-sorted by parent id so completion order never reaches the output

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::ExportConfig;
use super::progress::{ProgressEvent, ProgressObserver};
use super::{ExportError, ExportResult};
use crate::fetcher::{ApiRequest, FetcherError, PageWalker, ResilientFetcher};
use crate::metrics::record_enrichment_degraded;
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::{entity_id, Record};

/// Whether a sub-resource may be skipped when the store denies access to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Every failure is fatal
    Required,
    /// 403/404 degrades to "no supplemental data"
    Optional,
}

/// A sub-resource fetched through a batched id filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubResource {
    /// Short name used in logs and warnings
    pub name: &'static str,
    /// Store-relative listing path
    pub path: &'static str,
    /// Query parameter taking a comma-separated id set
    pub filter_param: &'static str,
    /// Field on each sub-record holding the parent id
    pub parent_key: &'static str,
    /// Failure tolerance
    pub availability: Availability,
}

/// Result of a batched id-filter fetch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Sub-records grouped by parent id, in upstream order within each parent
    pub by_parent: BTreeMap<i64, Vec<Record>>,
    /// Set when an optional sub-resource was unavailable
    pub degraded: Option<FetcherError>,
}

/// Issues supplemental fetches and hands back results keyed by parent id
#[derive(Clone)]
pub struct EnrichmentOrchestrator {
    config: Arc<ExportConfig>,
    fetcher: ResilientFetcher,
    observer: Arc<dyn ProgressObserver>,
    shutdown: SharedShutdown,
}

impl EnrichmentOrchestrator {
    /// Create an orchestrator sharing the run's fetcher, observer and shutdown handle
    pub fn new(
        config: Arc<ExportConfig>,
        fetcher: ResilientFetcher,
        observer: Arc<dyn ProgressObserver>,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            config,
            fetcher,
            observer,
            shutdown,
        }
    }

    /// Fetch `resource` for `parent_ids` in chunks of `id_chunk_size`
    ///
    /// Chunks are walked one after another. An optional resource answering 403/404
    /// on any chunk yields an empty mapping with `degraded` set; every other failure
    /// is returned as an error.
    pub async fn fetch_by_parent(
        &self,
        resource: &SubResource,
        parent_ids: &[i64],
    ) -> ExportResult<BatchOutcome> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = parent_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let mut outcome = BatchOutcome::default();
        if ids.is_empty() {
            return Ok(outcome);
        }

        let chunks: Vec<&[i64]> = ids.chunks(self.config.id_chunk_size.max(1)).collect();
        info!(
            resource = resource.name,
            parents = ids.len(),
            chunks = chunks.len(),
            "Fetching truncated sub-resource"
        );

        for (index, chunk) in chunks.iter().enumerate() {
            if self.shutdown.is_shutdown_requested() {
                return Err(ExportError::Cancelled);
            }

            let filter = chunk
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let request = ApiRequest::get(self.config.store_url(resource.path))
                .with_headers(self.config.headers())
                .with_query(vec![(resource.filter_param.to_string(), filter)]);
            let walker = PageWalker::new(
                self.fetcher.clone(),
                request,
                self.config.page_size,
                self.config.max_pages,
            );

            let records = match walker.collect_records().await {
                Ok(records) => records,
                Err(err) => {
                    return match degrade(resource, err) {
                        Ok(unavailable) => {
                            self.report_degraded(resource, &unavailable);
                            Ok(BatchOutcome {
                                by_parent: BTreeMap::new(),
                                degraded: Some(unavailable),
                            })
                        }
                        Err(err) => Err(err.into()),
                    }
                }
            };

            self.observer.on_event(&ProgressEvent::EnrichmentBatch {
                resource: resource.name,
                chunk: index + 1,
                chunks: chunks.len(),
                records: records.len(),
            });

            for record in records {
                match record.get(resource.parent_key).and_then(entity_id) {
                    Some(parent) => outcome.by_parent.entry(parent).or_default().push(record),
                    None => debug!(
                        resource = resource.name,
                        key = resource.parent_key,
                        "Sub-record without parent id skipped"
                    ),
                }
            }
        }

        Ok(outcome)
    }

    /// Run `fetch_one` once per id on a pool of `concurrency` workers
    ///
    /// Results come back sorted by id. The first failure stops new work from being
    /// scheduled, lets in-flight calls finish, and is then returned. A shutdown
    /// requested from outside yields [`ExportError::Cancelled`].
    pub async fn fan_out<T, F, Fut>(&self, ids: Vec<i64>, fetch_one: F) -> ExportResult<Vec<(i64, T)>>
    where
        F: Fn(i64) -> Fut,
        Fut: Future<Output = ExportResult<T>>,
    {
        let total = ids.len();
        let abort = ShutdownCoordinator::new();
        let abort = &abort;
        let shutdown = &self.shutdown;
        let fetch_one = &fetch_one;

        debug!(
            parents = total,
            concurrency = self.config.concurrency,
            "Starting per-entity fan-out"
        );

        let mut completions = stream::iter(ids)
            .map(|id| async move {
                if abort.is_shutdown_requested() || shutdown.is_shutdown_requested() {
                    return (id, None);
                }
                (id, Some(fetch_one(id).await))
            })
            .buffer_unordered(self.config.concurrency.max(1));

        let mut results = Vec::with_capacity(total);
        let mut first_error: Option<ExportError> = None;

        while let Some((id, outcome)) = completions.next().await {
            match outcome {
                None => {}
                Some(Ok(value)) => {
                    results.push((id, value));
                    self.observer.on_event(&ProgressEvent::ParentEnriched {
                        id,
                        completed: results.len(),
                        total,
                    });
                }
                Some(Err(err)) => {
                    if first_error.is_none() {
                        warn!(id, error = %err, "Per-entity fetch failed, draining in-flight requests");
                        abort.request_shutdown();
                        first_error = Some(err);
                    } else {
                        debug!(id, error = %err, "Additional failure while draining");
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if results.len() < total {
            return Err(ExportError::Cancelled);
        }

        results.sort_by_key(|(id, _)| *id);
        Ok(results)
    }

    fn report_degraded(&self, resource: &SubResource, unavailable: &FetcherError) {
        let status = unavailable.status().unwrap_or_default();
        warn!(
            resource = resource.name,
            status,
            "{unavailable}; continuing with inline data only"
        );
        record_enrichment_degraded(resource.name, status);
        self.observer.on_event(&ProgressEvent::EnrichmentDegraded {
            resource: resource.name,
            status,
        });
    }
}

/// Turn a 403/404 on an optional resource into `OptionalSubresourceUnavailable`
///
/// Anything else comes back unchanged as the error.
fn degrade(resource: &SubResource, err: FetcherError) -> Result<FetcherError, FetcherError> {
    match (&err, resource.availability) {
        (FetcherError::ClientRequestError { status, .. }, Availability::Optional)
            if matches!(status, 403 | 404) =>
        {
            Ok(FetcherError::OptionalSubresourceUnavailable {
                resource: resource.name.to_string(),
                status: *status,
            })
        }
        _ => Err(err),
    }
}
