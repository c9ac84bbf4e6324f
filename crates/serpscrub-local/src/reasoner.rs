//! Streaming analysis client for OpenAI-compatible reasoning models.
//!
//! Issues one `chat/completions` call with `stream: true` and exposes the
//! token stream as an [`AnalysisStream`] of [`StreamChunk`]s. Models with a
//! thinking phase (e.g. `deepseek-reasoner`) tag deltas as `reasoning_content`
//! or `content`; both are forwarded as-is, split by channel.

use std::collections::VecDeque;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serpscrub_core::prompt::{analysis_messages, Message};
use serpscrub_core::{AnalysisModel, AnalysisStream, Error, Result, ResultSet, StreamChunk};

use crate::sse::SseBuffer;
use crate::{api_key_from_env, base_url_from_env, chat_completions_endpoint, reasoner_model_from_env};

#[derive(Debug, Clone)]
pub struct ReasonerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ReasonerClient {
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
        }
    }

    pub fn from_env(client: reqwest::Client, model_override: Option<String>) -> Result<Self> {
        let base_url = base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing SERPSCRUB_BASE_URL (or DEEPSEEK_BASE_URL)".to_string())
        })?;
        let api_key = api_key_from_env();
        let model = model_override.unwrap_or_else(reasoner_model_from_env);
        Ok(Self::new(client, base_url, api_key, model))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Clone, Serialize)]
struct StreamingChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl StreamEvent {
    fn into_chunk(mut self) -> Option<StreamChunk> {
        if self.choices.is_empty() {
            return None;
        }
        let delta = self.choices.swap_remove(0).delta;
        Some(StreamChunk {
            reasoning_delta: delta.reasoning_content,
            answer_delta: delta.content,
        })
    }
}

struct SseState {
    inner: futures_util::stream::BoxStream<'static, Result<Vec<u8>>>,
    buf: SseBuffer,
    pending: VecDeque<Result<StreamChunk>>,
    done: bool,
}

#[async_trait::async_trait]
impl AnalysisModel for ReasonerClient {
    async fn analyze(&self, results: &ResultSet) -> Result<AnalysisStream> {
        let req = StreamingChatRequest {
            model: self.model.clone(),
            messages: analysis_messages(results),
            stream: true,
        };

        let mut rb = self
            .client
            .post(chat_completions_endpoint(&self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "text/event-stream");
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
                "reasoner chat.completions HTTP {status}"
            )));
        }

        let inner = resp
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(|e| Error::Llm(e.to_string())))
            .boxed();
        let state = SseState {
            inner,
            buf: SseBuffer::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures_util::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    // Transport end without `[DONE]`: treat as exhaustion.
                    None => {
                        st.done = true;
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        st.pending.push_back(Err(e));
                    }
                    Some(Ok(bytes)) => {
                        for payload in st.buf.push(&bytes) {
                            if payload == "[DONE]" {
                                st.done = true;
                                break;
                            }
                            match serde_json::from_str::<StreamEvent>(&payload) {
                                Ok(ev) => {
                                    if let Some(chunk) = ev.into_chunk() {
                                        st.pending.push_back(Ok(chunk));
                                    }
                                }
                                Err(e) => {
                                    st.done = true;
                                    st.pending.push_back(Err(Error::Llm(format!(
                                        "malformed stream event: {e}"
                                    ))));
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        })
        .boxed())
    }
}
