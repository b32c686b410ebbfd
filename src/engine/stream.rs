use super::types::Frame;

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Frame(Box<Frame>),
    Done,
}

/// Incremental `text/event-stream` decoder for engine frames. Bytes are
/// buffered until an event is complete, so characters split across chunks
/// decode intact.
#[derive(Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed. Events that fail
    /// to decode are logged and skipped.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.contains(&b'\r') {
            normalize_crlf(&mut self.buffer);
        }

        let mut items = Vec::new();
        let mut start = 0;

        while let Some(end) = find_event_end(&self.buffer[start..]) {
            let event_end = start + end + 2;
            let event_text = String::from_utf8_lossy(&self.buffer[start..event_end]);

            let data: Vec<&str> = event_text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
                .collect();

            if !data.is_empty() {
                let payload = data.join("\n");
                let payload = payload.trim();
                if payload == DONE_MARKER {
                    items.push(StreamItem::Done);
                } else if !payload.is_empty() {
                    match serde_json::from_str::<Frame>(payload) {
                        Ok(frame) => items.push(StreamItem::Frame(Box::new(frame))),
                        Err(err) => {
                            tracing::warn!(error = %err, data = payload, "skipping undecodable engine frame");
                        }
                    }
                }
            }

            start = event_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        items
    }

    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

fn find_event_end(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"\n\n")
}

/// Drops each `\r` that precedes `\n`. A trailing `\r` waits for the next chunk.
fn normalize_crlf(buffer: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(buffer.len());
    for (index, &byte) in buffer.iter().enumerate() {
        if byte == b'\r' && buffer.get(index + 1) == Some(&b'\n') {
            continue;
        }
        out.push(byte);
    }
    *buffer = out;
}
