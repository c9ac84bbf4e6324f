//! Stdout display sink.

use serpscrub_core::{DisplaySink, Error, Result};
use std::io::Write;

/// Streams model output to stdout as it arrives, newlines preserved.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl DisplaySink for StdoutSink {
    async fn render(&self, text: &str) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| Error::Render(e.to_string()))
    }
}
