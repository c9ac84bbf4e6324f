//! Prompt construction for the two model calls.
//!
//! Pure formatting over the run's [`ResultSet`] snapshot; no IO. Both stages
//! see the same serialized `results` so removal indices can never drift from
//! the snapshot the decision prompt was built on.

use crate::{AnalysisOutput, ResultSet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

pub const ANALYSIS_SYSTEM_PROMPT: &str = "\
You are a search engine assistant. The user gives you a search keyword `query` \
and the search results `results`.
For each entry in `results` (addressed by its `index`), analyze whether it is \
relevant to the user's query.
Favor official content and content that genuinely helps the search; flag \
misleading advertisements and risky third-party content.
You are offline, so ignore any date-related clues while analyzing.";

pub const DECISION_SYSTEM_PROMPT: &str = "\
You are a search engine assistant. The user gives you a search keyword `query`, \
the search results `results`, and an analysis of those results `analysis`.
For each entry in `results` (addressed by its `index`), `analysis` discusses in \
detail whether it is a misleading advertisement or risky third-party content.
Based *strictly* on `analysis`, remove every misleading advertisement and risky \
third-party entry, keeping official content and anything that genuinely helps \
the search.";

fn results_json(set: &ResultSet) -> String {
    // Results are plain data; serialization cannot fail here.
    serde_json::to_string(&set.results).unwrap_or_default()
}

/// Messages for the streaming analysis call.
pub fn analysis_messages(set: &ResultSet) -> Vec<Message> {
    vec![
        Message::system(ANALYSIS_SYSTEM_PROMPT),
        Message::user(format!(
            "The search keyword `query` is: {}\nThe search results `results` are: {}",
            set.query,
            results_json(set),
        )),
    ]
}

/// Messages for the structured decision call.
pub fn decision_messages(set: &ResultSet, analysis: &AnalysisOutput) -> Vec<Message> {
    vec![
        Message::system(DECISION_SYSTEM_PROMPT),
        Message::user(format!(
            "The search keyword `query` is: {}\nThe search results `results` are: {}\nThe analysis `analysis` is: {}",
            set.query,
            results_json(set),
            analysis.combined_text(),
        )),
    ]
}
