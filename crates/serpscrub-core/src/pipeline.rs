//! The two-stage orchestration pipeline.
//!
//! One run walks `Fetching → StreamingAnalysis → Deciding → ApplyingRemovals →
//! Done`. A stage-fatal error stops the run and records which stage failed;
//! render failures and per-index removal failures are local (logged and
//! reported, never escalated). The pipeline is the sole consumer of the
//! analysis stream and is single-flow by construction: callers must not share
//! one pipeline's collaborators across concurrent runs.

use futures_util::StreamExt;
use tracing::{info, warn};

use crate::{
    AnalysisModel, AnalysisOutput, DecisionModel, DisplaySink, Error, RemovalDecision,
    ResultSet, ResultSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    StreamingAnalysis,
    Deciding,
    ApplyingRemovals,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::StreamingAnalysis => "streaming_analysis",
            Self::Deciding => "deciding",
            Self::ApplyingRemovals => "applying_removals",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run that stopped before `Done`, with the stage it failed in.
#[derive(thiserror::Error, Debug)]
#[error("pipeline failed during {stage}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

#[derive(Debug)]
pub struct RemovalFailure {
    pub index: usize,
    pub error: Error,
}

/// Outcome of a completed run.
///
/// `removal_failures` is how per-index removal errors reach the caller; they
/// never abort the remaining removals.
#[derive(Debug)]
pub struct RunReport {
    pub result_set: ResultSet,
    pub analysis: AnalysisOutput,
    pub decision: RemovalDecision,
    /// Original indices whose removal was confirmed, in application (ascending) order.
    pub removed: Vec<usize>,
    pub removal_failures: Vec<RemovalFailure>,
}

fn banner(label: &str) -> String {
    let bar = "=".repeat(20);
    format!("{bar} {label} {bar}\n")
}

pub struct Pipeline<S, A, D, K> {
    source: S,
    analyst: A,
    decider: D,
    sink: K,
}

impl<S, A, D, K> Pipeline<S, A, D, K>
where
    S: ResultSource,
    A: AnalysisModel,
    D: DecisionModel,
    K: DisplaySink,
{
    pub fn new(source: S, analyst: A, decider: D, sink: K) -> Self {
        Self {
            source,
            analyst,
            decider,
            sink,
        }
    }

    /// The search collaborator, for callers that inspect the presentation
    /// after a run (e.g. to print the scrubbed view).
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Render a delta, swallowing (but logging) sink failures. A cosmetic
    /// rendering failure must never abort analysis.
    async fn render_lossy(&self, text: &str) {
        if let Err(e) = self.sink.render(text).await {
            warn!(error = %e, "could not render chunk; continuing");
        }
    }

    /// Run one query to completion.
    pub async fn run(&self, query: &str) -> std::result::Result<RunReport, PipelineError> {
        // Fetching.
        info!(query, provider = self.source.name(), "fetching results");
        let set = self.source.fetch(query).await.map_err(|source| PipelineError {
            stage: Stage::Fetching,
            source,
        })?;
        info!(count = set.len(), "fetched result set");

        // StreamingAnalysis. The stream is finite and consumed exactly once;
        // exhaustion advances the run even if neither channel ever opened.
        let mut stream = self
            .analyst
            .analyze(&set)
            .await
            .map_err(|source| PipelineError {
                stage: Stage::StreamingAnalysis,
                source,
            })?;
        let mut analysis = AnalysisOutput::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| PipelineError {
                stage: Stage::StreamingAnalysis,
                source,
            })?;
            if let Some(delta) = chunk.reasoning_delta {
                if analysis.reasoning.is_none() {
                    analysis.reasoning = Some(String::new());
                    self.render_lossy(&banner("Reasoning")).await;
                }
                // Channel is Some by the transition above.
                if let Some(buf) = analysis.reasoning.as_mut() {
                    buf.push_str(&delta);
                }
                self.render_lossy(&delta).await;
            }
            if let Some(delta) = chunk.answer_delta {
                if analysis.answer.is_none() {
                    analysis.answer = Some(String::new());
                    self.render_lossy(&format!("\n{}", banner("Final answer"))).await;
                }
                if let Some(buf) = analysis.answer.as_mut() {
                    buf.push_str(&delta);
                }
                self.render_lossy(&delta).await;
            }
        }
        info!(
            reasoning_chars = analysis.reasoning.as_deref().map_or(0, str::len),
            answer_chars = analysis.answer.as_deref().map_or(0, str::len),
            "analysis stream exhausted"
        );

        // Deciding. The raw payload is validated before any removal is
        // committed; an invalid list is never partially trusted.
        let raw = self
            .decider
            .decide(&set, &analysis)
            .await
            .map_err(|source| PipelineError {
                stage: Stage::Deciding,
                source,
            })?;
        let decision =
            RemovalDecision::from_raw(&raw, set.len()).map_err(|source| PipelineError {
                stage: Stage::Deciding,
                source,
            })?;
        info!(indices = ?decision.indices(), "removal decision");

        // ApplyingRemovals: one index at a time, ascending original-index
        // order. Each removal is attempted independently.
        let mut removed = Vec::with_capacity(decision.len());
        let mut removal_failures = Vec::new();
        for index in decision.ascending() {
            match self.source.remove(index).await {
                Ok(()) => {
                    info!(index, "removed entry");
                    removed.push(index);
                }
                Err(error) => {
                    warn!(index, error = %error, "could not remove entry");
                    removal_failures.push(RemovalFailure { index, error });
                }
            }
        }

        Ok(RunReport {
            result_set: set,
            analysis,
            decision,
            removed,
            removal_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AnalysisStream, RankedResult, Result, StreamChunk};
    use std::sync::Mutex;

    fn set(n: usize) -> ResultSet {
        ResultSet {
            query: "example".to_string(),
            results: (0..n)
                .map(|i| RankedResult {
                    index: i,
                    source: format!("site{i}.example"),
                    description: format!("result {i}"),
                })
                .collect(),
        }
    }

    struct FakeSource {
        set: ResultSet,
        removed: Mutex<Vec<usize>>,
        fail_remove: Option<usize>,
        fail_fetch: bool,
    }

    impl FakeSource {
        fn new(n: usize) -> Self {
            Self {
                set: set(n),
                removed: Mutex::new(Vec::new()),
                fail_remove: None,
                fail_fetch: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl ResultSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch(&self, _query: &str) -> Result<ResultSet> {
            if self.fail_fetch {
                return Err(Error::ProviderUnavailable("fixture down".to_string()));
            }
            Ok(self.set.clone())
        }

        async fn remove(&self, index: usize) -> Result<()> {
            if self.fail_remove == Some(index) {
                return Err(Error::Removal(format!("entry {index} is stuck")));
            }
            self.removed.lock().unwrap().push(index);
            Ok(())
        }
    }

    struct FakeAnalyst {
        chunks: Vec<StreamChunk>,
    }

    #[async_trait::async_trait]
    impl AnalysisModel for FakeAnalyst {
        async fn analyze(&self, _results: &ResultSet) -> Result<AnalysisStream> {
            let chunks: Vec<Result<StreamChunk>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(futures_util::stream::iter(chunks).boxed())
        }
    }

    struct FakeDecider {
        raw: Result<Vec<i64>>,
    }

    #[async_trait::async_trait]
    impl DecisionModel for FakeDecider {
        async fn decide(&self, _results: &ResultSet, _analysis: &AnalysisOutput) -> Result<Vec<i64>> {
            match &self.raw {
                Ok(v) => Ok(v.clone()),
                Err(Error::DecisionProtocol(m)) => Err(Error::DecisionProtocol(m.clone())),
                Err(e) => Err(Error::Llm(e.to_string())),
            }
        }
    }

    /// Sink that records rendered text; can fail on the nth call.
    struct RecordingSink {
        rendered: Mutex<Vec<String>>,
        fail_on_call: Option<usize>,
        calls: Mutex<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                rendered: Mutex::new(Vec::new()),
                fail_on_call: None,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl DisplaySink for RecordingSink {
        async fn render(&self, text: &str) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if self.fail_on_call == Some(*calls) {
                return Err(Error::Render("surface detached".to_string()));
            }
            self.rendered.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn reasoning(s: &str) -> StreamChunk {
        StreamChunk {
            reasoning_delta: Some(s.to_string()),
            answer_delta: None,
        }
    }

    fn answer(s: &str) -> StreamChunk {
        StreamChunk {
            reasoning_delta: None,
            answer_delta: Some(s.to_string()),
        }
    }

    #[tokio::test]
    async fn full_run_removes_decided_indices_in_ascending_order() {
        let pipeline = Pipeline::new(
            FakeSource::new(4),
            FakeAnalyst {
                chunks: vec![reasoning("hmm "), reasoning("ads at 1,3"), answer("remove 1 and 3")],
            },
            FakeDecider { raw: Ok(vec![3, 1]) },
            RecordingSink::new(),
        );
        let report = pipeline.run("example").await.unwrap();
        assert_eq!(report.removed, vec![1, 3]);
        assert!(report.removal_failures.is_empty());
        assert_eq!(report.analysis.reasoning.as_deref(), Some("hmm ads at 1,3"));
        assert_eq!(report.analysis.answer.as_deref(), Some("remove 1 and 3"));
        assert_eq!(
            pipeline.source.removed.lock().unwrap().as_slice(),
            &[1, 3]
        );
    }

    #[tokio::test]
    async fn channel_banners_render_once_before_first_delta() {
        let pipeline = Pipeline::new(
            FakeSource::new(2),
            FakeAnalyst {
                chunks: vec![reasoning("a"), reasoning("b"), answer("c"), answer("d")],
            },
            FakeDecider { raw: Ok(vec![]) },
            RecordingSink::new(),
        );
        pipeline.run("example").await.unwrap();
        let rendered = pipeline.sink.rendered.lock().unwrap().clone();
        let banners: Vec<&String> = rendered.iter().filter(|s| s.contains("====")).collect();
        assert_eq!(banners.len(), 2);
        assert!(banners[0].contains("Reasoning"));
        assert!(banners[1].contains("Final answer"));
        // Banner precedes its channel's first delta.
        assert_eq!(rendered[0], banner("Reasoning"));
        assert_eq!(rendered[1], "a");
    }

    #[tokio::test]
    async fn fetch_failure_stops_the_run_before_analysis() {
        let mut source = FakeSource::new(3);
        source.fail_fetch = true;
        let pipeline = Pipeline::new(
            source,
            FakeAnalyst { chunks: vec![] },
            FakeDecider { raw: Ok(vec![0]) },
            RecordingSink::new(),
        );
        let err = pipeline.run("example").await.unwrap_err();
        assert_eq!(err.stage, Stage::Fetching);
        assert!(pipeline.sink.rendered.lock().unwrap().is_empty());
        assert!(pipeline.source.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_tool_call_fails_deciding_with_zero_removals() {
        let pipeline = Pipeline::new(
            FakeSource::new(3),
            FakeAnalyst {
                chunks: vec![answer("all fine")],
            },
            FakeDecider {
                raw: Err(Error::DecisionProtocol("model returned no tool call".to_string())),
            },
            RecordingSink::new(),
        );
        let err = pipeline.run("example").await.unwrap_err();
        assert_eq!(err.stage, Stage::Deciding);
        assert!(pipeline.source.removed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_decision_payload_never_reaches_removal() {
        for raw in [vec![1, 1], vec![0, 5]] {
            let pipeline = Pipeline::new(
                FakeSource::new(3),
                FakeAnalyst { chunks: vec![] },
                FakeDecider { raw: Ok(raw) },
                RecordingSink::new(),
            );
            let err = pipeline.run("example").await.unwrap_err();
            assert_eq!(err.stage, Stage::Deciding);
            assert!(matches!(err.source, Error::DecisionProtocol(_)));
            assert!(pipeline.source.removed.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn render_failure_is_local_and_leaves_analysis_intact() {
        let mut sink = RecordingSink::new();
        // Call 1 is the reasoning banner; fail the first delta render.
        sink.fail_on_call = Some(2);
        let pipeline = Pipeline::new(
            FakeSource::new(2),
            FakeAnalyst {
                chunks: vec![reasoning("one "), reasoning("two")],
            },
            FakeDecider { raw: Ok(vec![0]) },
            sink,
        );
        let report = pipeline.run("example").await.unwrap();
        assert_eq!(report.analysis.reasoning.as_deref(), Some("one two"));
        assert_eq!(report.removed, vec![0]);
    }

    #[tokio::test]
    async fn removal_failure_is_reported_and_does_not_abort_the_rest() {
        let mut source = FakeSource::new(4);
        source.fail_remove = Some(1);
        let pipeline = Pipeline::new(
            source,
            FakeAnalyst { chunks: vec![] },
            FakeDecider {
                raw: Ok(vec![2, 1, 0]),
            },
            RecordingSink::new(),
        );
        let report = pipeline.run("example").await.unwrap();
        assert_eq!(report.removed, vec![0, 2]);
        assert_eq!(report.removal_failures.len(), 1);
        assert_eq!(report.removal_failures[0].index, 1);
    }

    #[tokio::test]
    async fn empty_stream_still_reaches_deciding() {
        let pipeline = Pipeline::new(
            FakeSource::new(2),
            FakeAnalyst { chunks: vec![] },
            FakeDecider { raw: Ok(vec![]) },
            RecordingSink::new(),
        );
        let report = pipeline.run("example").await.unwrap();
        assert_eq!(report.analysis, AnalysisOutput::default());
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn mixed_chunk_feeds_both_channels() {
        let pipeline = Pipeline::new(
            FakeSource::new(1),
            FakeAnalyst {
                chunks: vec![StreamChunk {
                    reasoning_delta: Some("r".to_string()),
                    answer_delta: Some("a".to_string()),
                }],
            },
            FakeDecider { raw: Ok(vec![]) },
            RecordingSink::new(),
        );
        let report = pipeline.run("example").await.unwrap();
        assert_eq!(report.analysis.reasoning.as_deref(), Some("r"));
        assert_eq!(report.analysis.answer.as_deref(), Some("a"));
    }
}
