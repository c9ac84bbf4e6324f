//! Backend-agnostic types and traits for the serpscrub pipeline.
//!
//! The pipeline itself lives in [`pipeline`]; prompt construction for the two
//! model calls lives in [`prompt`]. Everything here is IO-free: concrete
//! providers, model clients, and display surfaces plug in via the collaborator
//! traits at the bottom of this module.

use serde::{Deserialize, Serialize};

pub mod pipeline;
pub mod prompt;

pub use pipeline::{Pipeline, PipelineError, RemovalFailure, RunReport, Stage};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("decision protocol violation: {0}")]
    DecisionProtocol(String),
    #[error("removal failed: {0}")]
    Removal(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One ranked entry in a search response.
///
/// `index` is assigned at fetch time, is unique within its [`ResultSet`], and
/// is the only handle the rest of the pipeline uses to refer to this entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankedResult {
    pub index: usize,
    /// Site/domain-like label for where the entry came from.
    pub source: String,
    /// Free-text snippet shown for the entry.
    pub description: String,
}

/// The full ordered result collection for one query.
///
/// Ordering mirrors presentation order and is the coordinate space for removal
/// indices. Built once per run and never mutated in place; removal is a side
/// effect on the presentation layer, not on this snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub query: String,
    pub results: Vec<RankedResult>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Accumulated streamed model output, split by channel.
///
/// Each channel starts unset and transitions at most once to `Some("")` when
/// the first delta of that kind arrives, then grows append-only. A channel
/// that never produced a delta stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisOutput {
    pub reasoning: Option<String>,
    pub answer: Option<String>,
}

impl AnalysisOutput {
    /// Both channels joined for the decision prompt, skipping unset ones.
    pub fn combined_text(&self) -> String {
        match (self.reasoning.as_deref(), self.answer.as_deref()) {
            (Some(r), Some(a)) => format!("{r}\n{a}"),
            (Some(r), None) => r.to_string(),
            (None, Some(a)) => a.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// One increment from the analysis stream.
///
/// A chunk may carry a reasoning delta, an answer delta, both, or neither;
/// consumers must not assume either field is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    pub reasoning_delta: Option<String>,
    pub answer_delta: Option<String>,
}

/// Validated list of result indices to remove, in decoded order.
///
/// Construction is the only place the decision payload is trusted: duplicates
/// and out-of-range entries are a [`Error::DecisionProtocol`] failure, never a
/// silently-corrected value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalDecision(Vec<usize>);

impl RemovalDecision {
    /// Validate a raw decoded index list against the originating result set.
    pub fn from_raw(raw: &[i64], result_count: usize) -> Result<Self> {
        let mut seen = vec![false; result_count];
        let mut out = Vec::with_capacity(raw.len());
        for &ix in raw {
            let Ok(ix) = usize::try_from(ix) else {
                return Err(Error::DecisionProtocol(format!(
                    "negative index {ix} in decision payload"
                )));
            };
            if ix >= result_count {
                return Err(Error::DecisionProtocol(format!(
                    "index {ix} out of range for {result_count} results"
                )));
            }
            if seen[ix] {
                return Err(Error::DecisionProtocol(format!(
                    "duplicate index {ix} in decision payload"
                )));
            }
            seen[ix] = true;
            out.push(ix);
        }
        Ok(Self(out))
    }

    /// Indices in decoded order.
    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Indices in ascending original-index order, the order removals are applied in.
    pub fn ascending(&self) -> Vec<usize> {
        let mut v = self.0.clone();
        v.sort_unstable();
        v
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Finite, single-use stream of analysis increments. One upstream model call
/// per stream; re-invoking [`AnalysisModel::analyze`] issues a new call.
pub type AnalysisStream = futures_util::stream::BoxStream<'static, Result<StreamChunk>>;

/// Search collaborator: produces a [`ResultSet`] and removes entries from the
/// presentation by original index.
#[async_trait::async_trait]
pub trait ResultSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the search. Returned indices are 0-based, contiguous, and stable
    /// for the remainder of the run.
    async fn fetch(&self, query: &str) -> Result<ResultSet>;

    /// Blank the presentation entry for `index`, resolved against the
    /// *original* indexing from [`fetch`](Self::fetch). Idempotent.
    async fn remove(&self, index: usize) -> Result<()>;
}

/// Presentation surface for streamed model output. Must preserve newlines.
/// Failures are cosmetic: the pipeline logs and keeps consuming the stream.
#[async_trait::async_trait]
pub trait DisplaySink: Send + Sync {
    async fn render(&self, text: &str) -> Result<()>;
}

/// Reasoning-capable model whose output interleaves a thinking phase with the
/// externally-visible answer.
#[async_trait::async_trait]
pub trait AnalysisModel: Send + Sync {
    async fn analyze(&self, results: &ResultSet) -> Result<AnalysisStream>;
}

/// Non-streaming model constrained to emit exactly one structured call of the
/// shape `{indices: [int]}`. Implementations return the raw decoded list; the
/// pipeline validates it into a [`RemovalDecision`]. Absence of a call is a
/// protocol violation, not an empty decision.
#[async_trait::async_trait]
pub trait DecisionModel: Send + Sync {
    async fn decide(&self, results: &ResultSet, analysis: &AnalysisOutput) -> Result<Vec<i64>>;
}
