//! Page walking over one listing endpoint
//!
//! Two termination strategies, picked per response by its shape:
//! - Metadata: `{ data: [...], meta: { pagination: { current_page, total_pages, total } } }`,
//!   stop when `current_page >= total_pages` or a page is empty
//! - Length inference: a bare array (or an envelope without pagination metadata),
//!   stop on the first page shorter than the requested page size
//!
//! Includes safety mechanisms:
//! - Maximum page bound to prevent infinite loops
//! - Empty response detection (204 / blank body is an empty page)
//!
//! Pages are fetched strictly one after another; page N+1 is never requested before
//! page N has been handed to the consumer.

use futures::stream::{self, Stream, TryStreamExt};
use serde_json::Value;
use tracing::debug;

use super::resilient::json_type_name;
use super::{ApiRequest, ApiResponse, FetcherError, FetcherResult, ResilientFetcher};
use crate::export::config::MAX_PAGE_SIZE;
use crate::Record;

/// Header carrying the collection size on bare-array endpoints
const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// How the walker decided where the listing ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `meta.pagination` page counts
    Metadata,
    /// Short page terminates
    LengthInference,
}

/// One non-empty page of a listing
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    /// Entities on this page
    pub items: Vec<Record>,
    /// Total entity count, when the upstream advertises one
    pub total_hint: Option<u64>,
    /// Strategy used for this page
    pub style: PaginationStyle,
}

/// Sequential walker over the pages of one listing
#[derive(Clone)]
pub struct PageWalker {
    fetcher: ResilientFetcher,
    request: ApiRequest,
    page_size: u32,
    max_pages: u32,
}

struct ParsedPage {
    items: Vec<Record>,
    total_hint: Option<u64>,
    style: PaginationStyle,
    has_more: bool,
}

struct WalkState {
    walker: PageWalker,
    next_page: u32,
    finished: bool,
}

impl PageWalker {
    /// Walk `request` (its query is the base query) with `page_size` items per page
    ///
    /// The page size is clamped to `1..=250`.
    pub fn new(fetcher: ResilientFetcher, request: ApiRequest, page_size: u32, max_pages: u32) -> Self {
        Self {
            fetcher,
            request,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            max_pages,
        }
    }

    /// Lazily produce the non-empty pages of the listing, in order
    ///
    /// The stream ends after the last page; the first error ends it too.
    pub fn pages(self) -> impl Stream<Item = FetcherResult<Page>> {
        let state = WalkState {
            walker: self,
            next_page: 1,
            finished: false,
        };

        stream::try_unfold(state, |mut state| async move {
            if state.finished {
                return Ok(None);
            }

            let number = state.next_page;
            if number > state.walker.max_pages {
                return Err(FetcherError::PageLimitExceeded {
                    url: state.walker.request.url.clone(),
                    max_pages: state.walker.max_pages,
                });
            }

            let parsed = state.walker.fetch_page(number).await?;
            state.next_page += 1;
            state.finished = !parsed.has_more;

            if parsed.items.is_empty() {
                debug!(page = number, "Empty page received, listing exhausted");
                return Ok(None);
            }

            debug!(
                page = number,
                items = parsed.items.len(),
                last = state.finished,
                "Received page"
            );

            let page = Page {
                number,
                items: parsed.items,
                total_hint: parsed.total_hint,
                style: parsed.style,
            };
            Ok(Some((page, state)))
        })
    }

    /// Walk every page and concatenate the entities
    pub async fn collect_records(self) -> FetcherResult<Vec<Record>> {
        self.pages()
            .try_fold(Vec::new(), |mut all, page| async move {
                all.extend(page.items);
                Ok(all)
            })
            .await
    }

    async fn fetch_page(&self, number: u32) -> FetcherResult<ParsedPage> {
        let mut request = self.request.clone();
        request.set_param("page", number.to_string());
        request.set_param("limit", self.page_size.to_string());

        debug!(url = %request.url, page = number, "Fetching page");
        let (body, response) = self.fetcher.fetch_json(&request).await?;
        parse_page(&request.url, body, &response, self.page_size)
    }
}

/// Interpret one listing response
fn parse_page(
    url: &str,
    body: Option<Value>,
    response: &ApiResponse,
    page_size: u32,
) -> FetcherResult<ParsedPage> {
    let header_total = response
        .header(TOTAL_COUNT_HEADER)
        .and_then(|v| v.trim().parse::<u64>().ok());

    let Some(body) = body else {
        return Ok(ParsedPage {
            items: Vec::new(),
            total_hint: header_total,
            style: PaginationStyle::LengthInference,
            has_more: false,
        });
    };

    match body {
        Value::Array(items) => {
            let items = into_records(url, items)?;
            let has_more = items.len() >= page_size as usize;
            Ok(ParsedPage {
                items,
                total_hint: header_total,
                style: PaginationStyle::LengthInference,
                has_more,
            })
        }
        Value::Object(mut envelope) => {
            let items = match envelope.remove("data") {
                Some(Value::Array(items)) => into_records(url, items)?,
                Some(Value::Null) => Vec::new(),
                Some(other) => {
                    return Err(FetcherError::UnexpectedResponseShape {
                        url: url.to_string(),
                        detail: format!("'data' is {}, expected an array", json_type_name(&other)),
                    })
                }
                None => {
                    return Err(FetcherError::UnexpectedResponseShape {
                        url: url.to_string(),
                        detail: "object response without a 'data' array".to_string(),
                    })
                }
            };

            let pagination = envelope
                .get("meta")
                .and_then(|meta| meta.get("pagination"));
            let current = pagination.and_then(|p| p.get("current_page")).and_then(Value::as_u64);
            let total_pages = pagination.and_then(|p| p.get("total_pages")).and_then(Value::as_u64);
            let total = pagination
                .and_then(|p| p.get("total"))
                .and_then(Value::as_u64)
                .or(header_total);

            match (current, total_pages) {
                (Some(current), Some(total_pages)) => Ok(ParsedPage {
                    has_more: current < total_pages && !items.is_empty(),
                    items,
                    total_hint: total,
                    style: PaginationStyle::Metadata,
                }),
                _ => Ok(ParsedPage {
                    has_more: items.len() >= page_size as usize,
                    items,
                    total_hint: total,
                    style: PaginationStyle::LengthInference,
                }),
            }
        }
        other => Err(FetcherError::UnexpectedResponseShape {
            url: url.to_string(),
            detail: format!("expected an array or object body, got {}", json_type_name(&other)),
        }),
    }
}

fn into_records(url: &str, items: Vec<Value>) -> FetcherResult<Vec<Record>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(FetcherError::UnexpectedResponseShape {
                url: url.to_string(),
                detail: format!("listing entry is {}, expected an object", json_type_name(&other)),
            }),
        })
        .collect()
}
