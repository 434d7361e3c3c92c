//! Accumulates a script draft streamed in chunks by a text generator.
//!
//! The runtime never sees partial drafts; callers hand the finished text to
//! `ScriptRuntime::set_scene_source` / `set_entity_source`.

const FENCE: &str = "```";

#[derive(Debug, Default, Clone)]
pub struct ScriptDraft {
    buffer: String,
    chunks: usize,
}

impl ScriptDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        self.chunks += 1;
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    pub fn raw(&self) -> &str {
        &self.buffer
    }

    /// The script body as far as it has arrived: the first fenced block when one is open,
    /// otherwise the whole text, trimmed.
    pub fn candidate(&self) -> String {
        extract_script(&self.buffer)
    }

    pub fn finish(self) -> String {
        self.candidate()
    }
}

fn extract_script(text: &str) -> String {
    let Some(open) = text.find(FENCE) else {
        return text.trim().to_string();
    };
    let after_fence = &text[open + FENCE.len()..];
    // Skip the info string (`rhai`, `js`, ...) up to the end of the fence line.
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => return String::new(),
    };
    let body = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}
