//! Incremental `data:` line extraction for SSE response bodies.

/// Buffers raw body chunks and yields the payload of each complete `data:` line.
///
/// Lines may be terminated by `\n` or `\r\n`; Gemini uses the latter, most
/// Chat Completions providers the former.
#[derive(Debug, Default)]
pub(super) struct DataLines {
    buf: Vec<u8>,
}

impl DataLines {
    /// Feed a chunk and return the data payloads of every line it completes.
    pub(super) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.drain(..=pos).collect::<Vec<_>>();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.trim().strip_prefix("data:") {
                out.push(data.trim().to_string());
            }
        }
        out
    }

    /// Payload of a trailing `data:` line that never got its newline.
    pub(super) fn finish(self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buf);
        line.trim()
            .strip_prefix("data:")
            .map(|data| data.trim().to_string())
    }
}
