//! Local (reqwest) implementations of the serpscrub collaborator traits:
//! an OpenAI-compatible streaming reasoner, a tool-call decision client, a
//! SearXNG-backed result source, and a stdout display sink.

pub mod console;
pub mod decision;
pub mod reasoner;
pub mod source;
mod sse;

pub use console::StdoutSink;
pub use decision::DecisionClient;
pub use reasoner::ReasonerClient;
pub use source::SearxngResultSource;

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// API key for the model endpoint. `SERPSCRUB_API_KEY`, falling back to
/// `DEEPSEEK_API_KEY` for drop-in reuse of an existing DeepSeek setup.
pub(crate) fn api_key_from_env() -> Option<String> {
    env("SERPSCRUB_API_KEY").or_else(|| env("DEEPSEEK_API_KEY"))
}

/// Base URL for the OpenAI-compatible endpoint (no trailing path).
pub(crate) fn base_url_from_env() -> Option<String> {
    env("SERPSCRUB_BASE_URL").or_else(|| env("DEEPSEEK_BASE_URL"))
}

pub(crate) fn reasoner_model_from_env() -> String {
    env("SERPSCRUB_REASONER_MODEL").unwrap_or_else(|| "deepseek-reasoner".to_string())
}

pub(crate) fn decision_model_from_env() -> String {
    env("SERPSCRUB_DECISION_MODEL").unwrap_or_else(|| "deepseek-chat".to_string())
}

pub(crate) fn chat_completions_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}
