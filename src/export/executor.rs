//! Export executor
//!
//! Runs one entity export end to end:
//! walk listing → enrich truncated sub-lists per page → per-entity fan-out →
//! flatten → unify columns. Everything stays in memory until the table is complete;
//! a fatal error discards the run.

use futures::TryStreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::ExportConfig;
use super::enrichment::EnrichmentOrchestrator;
use super::progress::{NoopObserver, ProgressEvent, ProgressObserver};
use super::{ExportError, ExportResult};
use crate::fetcher::{ApiRequest, FetcherError, PageWalker, ReqwestTransport, ResilientFetcher, Transport};
use crate::flatten::schema::unify;
use crate::flatten::{AttributeNames, RecordFlattener};
use crate::metrics::ExportMetrics;
use crate::registry::{self, EntityProfile, PerEntityFetch};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::{entity_id, EntityKind, FlatRecord, Record};

/// Unified output of one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    /// Entity exported
    pub entity: EntityKind,
    /// Column headers in output order
    pub columns: Vec<String>,
    /// Rendered rows, one per entity, padded to `columns`
    pub rows: Vec<Vec<String>>,
    /// Non-fatal warnings (degraded enrichment)
    pub warnings: Vec<String>,
}

impl ExportTable {
    /// Number of exported entities
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether nothing was exported
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Export executor orchestrates the complete export workflow
pub struct Exporter {
    config: Arc<ExportConfig>,
    fetcher: ResilientFetcher,
    observer: Arc<dyn ProgressObserver>,
    shutdown: SharedShutdown,
}

impl Exporter {
    /// Create an executor over a reqwest transport configured from `config`
    pub fn new(config: Arc<ExportConfig>) -> ExportResult<Self> {
        let transport = ReqwestTransport::with_timeouts(config.connect_timeout, config.request_timeout)
            .map_err(|e| ExportError::Configuration(e.to_string()))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create an executor over any transport
    pub fn with_transport(config: Arc<ExportConfig>, transport: Arc<dyn Transport>) -> Self {
        let fetcher = ResilientFetcher::new(transport, config.retry.clone());
        Self {
            config,
            fetcher,
            observer: Arc::new(NoopObserver),
            shutdown: ShutdownCoordinator::shared(),
        }
    }

    /// Attach a progress observer
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Export every entity of `kind`
    ///
    /// # Errors
    /// Any fatal fetch error, [`ExportError::Cancelled`] after a shutdown request.
    pub async fn export(&self, kind: EntityKind) -> ExportResult<ExportTable> {
        let metrics = ExportMetrics::start(kind.as_str());
        match self.run(registry::profile(kind)).await {
            Ok(table) => {
                metrics.record_success(table.len() as u64);
                Ok(table)
            }
            Err(err) => {
                metrics.record_failure(err.kind(), &err.to_string());
                Err(err)
            }
        }
    }

    async fn run(&self, profile: &EntityProfile) -> ExportResult<ExportTable> {
        let kind = profile.kind;
        let attribute_names = match profile.attribute_definitions_path {
            Some(path) => {
                let definitions = self.walker(path, &[]).collect_records().await?;
                let names = AttributeNames::from_definitions(&definitions);
                info!(entity = %kind, definitions = names.len(), "Attribute definitions loaded");
                names
            }
            None => AttributeNames::default(),
        };

        let enrichment = EnrichmentOrchestrator::new(
            self.config.clone(),
            self.fetcher.clone(),
            self.observer.clone(),
            self.shutdown.clone(),
        );

        let mut warnings = Vec::new();
        let mut records: Vec<Record> = Vec::new();

        let pages = self.walker(profile.listing_path, profile.listing_query).pages();
        futures::pin_mut!(pages);

        while let Some(page) = pages.try_next().await? {
            if self.shutdown.is_shutdown_requested() {
                return Err(ExportError::Cancelled);
            }

            self.observer.on_event(&ProgressEvent::PageFetched {
                entity: kind,
                page: page.number,
                items: page.items.len(),
                total_hint: page.total_hint,
            });

            let mut batch = page.items;
            if !profile.truncated_lists.is_empty() {
                let before = batch.len();
                batch.retain(|record| record.get("id").and_then(entity_id).is_some());
                if batch.len() < before {
                    warn!(
                        entity = %kind,
                        page = page.number,
                        dropped = before - batch.len(),
                        "Skipping records without a numeric id"
                    );
                }
            }
            self.enrich_truncated(profile, &enrichment, &mut batch, &mut warnings)
                .await?;
            records.extend(batch);
        }

        info!(entity = %kind, records = records.len(), "Listing exhausted");

        if let Some(fetch) = &profile.per_entity {
            self.enrich_per_entity(profile, fetch, &enrichment, &mut records)
                .await?;
        }

        let flattener = RecordFlattener::new(profile.flatten_config(&self.config))
            .with_attribute_names(attribute_names);
        let flat: Vec<FlatRecord> = records.iter().map(|r| flattener.flatten(r)).collect();
        self.observer
            .on_event(&ProgressEvent::RecordsFlattened { count: flat.len() });

        let schema = unify(flattener.config().layout(), &flat);
        let rows = flat.iter().map(|r| schema.render_row(r)).collect();

        Ok(ExportTable {
            entity: kind,
            columns: schema.names(),
            rows,
            warnings,
        })
    }

    /// Replace truncated inline sub-lists on one page of parents
    async fn enrich_truncated(
        &self,
        profile: &EntityProfile,
        enrichment: &EnrichmentOrchestrator,
        batch: &mut [Record],
        warnings: &mut Vec<String>,
    ) -> ExportResult<()> {
        for rule in profile.truncated_lists {
            let ids: Vec<i64> = batch
                .iter()
                .filter(|record| rule.is_truncated(record))
                .filter_map(|record| record.get("id").and_then(entity_id))
                .collect();
            if ids.is_empty() {
                continue;
            }

            debug!(
                resource = rule.resource.name,
                parents = ids.len(),
                "Inline sub-list truncated"
            );
            let outcome = enrichment.fetch_by_parent(&rule.resource, &ids).await?;

            if let Some(degraded) = outcome.degraded {
                let warning = degraded.to_string();
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
            }

            for record in batch.iter_mut() {
                let Some(id) = record.get("id").and_then(entity_id) else {
                    continue;
                };
                if let Some(subs) = outcome.by_parent.get(&id) {
                    let list = subs.iter().cloned().map(Value::Object).collect();
                    record.insert(rule.target_field.to_string(), Value::Array(list));
                }
            }
        }
        Ok(())
    }

    /// One supplemental call per parent, merged under the profile's field, sorted by id
    async fn enrich_per_entity(
        &self,
        profile: &EntityProfile,
        fetch: &PerEntityFetch,
        enrichment: &EnrichmentOrchestrator,
        records: &mut Vec<Record>,
    ) -> ExportResult<()> {
        let mut ids = BTreeSet::new();
        for record in records.iter() {
            match record.get("id").and_then(entity_id) {
                Some(id) => {
                    ids.insert(id);
                }
                None => {
                    return Err(FetcherError::UnexpectedResponseShape {
                        url: self.config.store_url(profile.listing_path),
                        detail: format!("{} without a numeric id", profile.kind.singular()),
                    }
                    .into())
                }
            }
        }

        info!(
            entity = %profile.kind,
            parents = ids.len(),
            concurrency = self.config.concurrency,
            "Fetching per-entity sub-resources"
        );

        let results = enrichment
            .fan_out(ids.into_iter().collect(), |id| {
                let fetcher = self.fetcher.clone();
                let request = ApiRequest::get(self.config.store_url(&fetch.path_for(id)))
                    .with_headers(self.config.headers());
                async move { fetcher.fetch_array(&request).await.map_err(ExportError::from) }
            })
            .await?;

        let by_id: BTreeMap<i64, Vec<Value>> = results.into_iter().collect();
        for record in records.iter_mut() {
            if let Some(items) = record.get("id").and_then(entity_id).and_then(|id| by_id.get(&id)) {
                let items = Value::Array(items.clone());
                record.insert(fetch.merge_field.to_string(), items);
            }
        }

        records.sort_by_key(|record| record.get("id").and_then(entity_id));
        Ok(())
    }

    fn walker(&self, path: &str, query: &[(&str, &str)]) -> PageWalker {
        let request = ApiRequest::get(self.config.store_url(path))
            .with_headers(self.config.headers())
            .with_query(
                query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        PageWalker::new(
            self.fetcher.clone(),
            request,
            self.config.page_size,
            self.config.max_pages,
        )
    }
}
