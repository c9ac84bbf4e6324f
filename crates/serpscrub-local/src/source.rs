//! SearXNG-backed result source.
//!
//! `fetch` runs the search and snapshots the entries as the presentation the
//! rest of the run sees; `remove` blanks entries in that snapshot by their
//! original index, idempotently. Indices are assigned by enumeration at fetch
//! time and stay stable for the remainder of the run regardless of how many
//! entries have been blanked.

use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serpscrub_core::{Error, RankedResult, Result, ResultSet, ResultSource};
use tracing::{debug, warn};

use crate::env;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

pub(crate) fn searxng_endpoint_from_env() -> Option<String> {
    env("SERPSCRUB_SEARXNG_ENDPOINT")
}

pub struct SearxngResultSource {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
    presentation: Mutex<Vec<PresentedEntry>>,
}

#[derive(Debug, Clone)]
struct PresentedEntry {
    result: RankedResult,
    removed: bool,
}

impl SearxngResultSource {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            max_results: 10,
            presentation: Mutex::new(Vec::new()),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let endpoint = searxng_endpoint_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SERPSCRUB_SEARXNG_ENDPOINT".to_string())
        })?;
        Ok(Self::new(client, endpoint))
    }

    /// Cap on fetched results, clamped to `1..=20`.
    pub fn with_max_results(mut self, n: usize) -> Self {
        let clamped = n.clamp(1, 20);
        if clamped != n {
            warn!(requested = n, using = clamped, "max_results clamped");
        }
        self.max_results = clamped;
        self
    }

    /// Accept either a base URL or a full `/search` endpoint.
    fn endpoint_search(&self) -> String {
        let mut base = self.endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    /// Entries not yet removed, in original order with original indices.
    pub fn surviving(&self) -> Vec<RankedResult> {
        self.presentation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|e| !e.removed)
            .map(|e| e.result.clone())
            .collect()
    }

    fn install_snapshot(&self, results: &[RankedResult]) {
        let mut p = self
            .presentation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *p = results
            .iter()
            .map(|r| PresentedEntry {
                result: r.clone(),
                removed: false,
            })
            .collect();
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
    engine: Option<String>,
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Site/domain-like label for an entry: the URL host when it parses, else the
/// reporting engine, else the raw URL.
fn source_label(raw_url: &str, engine: Option<&str>) -> String {
    url::Url::parse(raw_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .or_else(|| engine.map(|e| e.to_string()))
        .unwrap_or_else(|| raw_url.to_string())
}

fn to_result_set(query: &str, parsed: SearxngSearchResponse, max_results: usize) -> ResultSet {
    let mut results = Vec::new();
    if let Some(rs) = parsed.results {
        for r in rs.into_iter() {
            if results.len() >= max_results {
                break;
            }
            let Some(raw_url) = r.url else { continue };
            let title = r.title.as_deref().unwrap_or("");
            let snippet = r.content.as_deref().unwrap_or("");
            results.push(RankedResult {
                index: results.len(),
                source: source_label(&raw_url, r.engine.as_deref()),
                description: collapse_whitespace(&format!("{title} {snippet}")),
            });
        }
    }
    ResultSet {
        query: query.to_string(),
        results,
    }
}

#[async_trait::async_trait]
impl ResultSource for SearxngResultSource {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn fetch(&self, query: &str) -> Result<ResultSet> {
        let resp = self
            .client
            .get(self.endpoint_search())
            .query(&[("q", query), ("format", "json")])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("searxng search HTTP {status}")));
        }

        let parsed: SearxngSearchResponse =
            resp.json().await.map_err(|e| Error::Fetch(e.to_string()))?;
        let set = to_result_set(query, parsed, self.max_results);
        debug!(count = set.len(), "installed presentation snapshot");
        self.install_snapshot(&set.results);
        Ok(set)
    }

    async fn remove(&self, index: usize) -> Result<()> {
        let mut p = self
            .presentation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match p.get_mut(index) {
            Some(entry) => {
                // Repeated removal of the same index is a no-op.
                entry.removed = true;
                Ok(())
            }
            None => Err(Error::Removal(format!(
                "index {index} outside the fetched result view ({} entries)",
                p.len()
            ))),
        }
    }
}
