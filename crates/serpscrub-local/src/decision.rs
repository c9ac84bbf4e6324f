//! Structured decision client.
//!
//! One non-streaming `chat/completions` call, constrained with
//! `tool_choice: "required"` to a single `remove_results` function tool whose
//! schema is `{indices: [int]}`. A response without a tool call, or whose
//! arguments fail to decode, is a protocol violation — there is no free-text
//! fallback.

use serde::{Deserialize, Serialize};
use serpscrub_core::prompt::{decision_messages, Message};
use serpscrub_core::{AnalysisOutput, DecisionModel, Error, Result, ResultSet};

use crate::{api_key_from_env, base_url_from_env, chat_completions_endpoint, decision_model_from_env};
use std::time::Duration;

/// Decision calls do not stream, so a hung connection would otherwise stall
/// the run indefinitely. Generous, since the model re-reads the full analysis.
const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct DecisionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl DecisionClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            timeout: DEFAULT_DECISION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SERPSCRUB_BASE_URL (or DEEPSEEK_BASE_URL)".to_string())
        })?;
        let api_key = api_key_from_env();
        let model = model_override.unwrap_or_else(decision_model_from_env);
        Ok(Self::new(client, base_url, api_key, model))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn remove_results_tool() -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": "remove_results",
            "description": "Remove entries from the displayed search results by index.",
            "parameters": {
                "type": "object",
                "properties": {
                    "indices": {
                        "type": "array",
                        "items": { "type": "integer" },
                        "description": "The `index` of every entry in `results` that is a misleading advertisement or risky third-party content."
                    }
                },
                "required": ["indices"]
            }
        }
    })
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    tools: Vec<serde_json::Value>,
    tool_choice: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    name: String,
    /// JSON-encoded arguments, per the chat-completions wire format.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct RemoveResultsArgs {
    indices: Vec<i64>,
}

fn indices_from_response(resp: ChatCompletionsResponse) -> Result<Vec<i64>> {
    let call = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.tool_calls.into_iter().next())
        .ok_or_else(|| {
            Error::DecisionProtocol("model returned no tool call".to_string())
        })?;
    if call.function.name != "remove_results" {
        return Err(Error::DecisionProtocol(format!(
            "unexpected tool call {:?}",
            call.function.name
        )));
    }
    let args: RemoveResultsArgs = serde_json::from_str(&call.function.arguments)
        .map_err(|e| Error::DecisionProtocol(format!("malformed tool arguments: {e}")))?;
    Ok(args.indices)
}

#[async_trait::async_trait]
impl DecisionModel for DecisionClient {
    async fn decide(&self, results: &ResultSet, analysis: &AnalysisOutput) -> Result<Vec<i64>> {
        let req = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: decision_messages(results, analysis),
            tools: vec![remove_results_tool()],
            tool_choice: "required",
        };

        let mut rb = self
            .client
            .post(chat_completions_endpoint(&self.base_url))
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "decision chat.completions HTTP {status}"
            )));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        indices_from_response(parsed)
    }
}
