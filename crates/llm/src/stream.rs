//! Line framing for streamed response bodies
//!
//! HTTP chunks can split a line, and a multi-byte character, anywhere.
//! Bytes are buffered until a newline arrives so decoding only ever sees
//! complete lines.

/// Accumulates body chunks and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, trimmed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Flush a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_line_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"a\":").is_empty());
        let lines = buf.push(b"1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_multibyte_char_split() {
        let text = "正在查询\n".as_bytes();
        let mut buf = LineBuffer::new();
        // Split inside the first character's three-byte sequence
        assert!(buf.push(&text[..2]).is_empty());
        assert_eq!(buf.push(&text[2..]), vec!["正在查询"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"data: x\r\n\r\ndata: y\r\n");
        assert_eq!(lines, vec!["data: x", "data: y"]);
    }

    #[test]
    fn test_finish_returns_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"done");
        assert_eq!(buf.finish().as_deref(), Some("done"));
        assert!(buf.finish().is_none());
    }
}
