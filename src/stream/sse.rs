//! Incremental SSE event parser.
//!
//! [`SseParser`] turns arbitrarily split transport chunks into complete SSE
//! events. Bytes are buffered until a full line is available, so a chunk
//! boundary falling inside a line, a multi-byte UTF-8 sequence or an event
//! never changes what gets emitted. An event is only dispatched once its
//! terminating blank line has been seen.

use crate::error::{Error, Result};

/// Default cap for a single buffered line or event, in bytes.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1024 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A dispatched event; `data` is the `data:` lines joined with `\n`.
    Event {
        event: Option<String>,
        id: Option<String>,
        data: String,
    },
    /// A `retry:` field changed the reconnect interval (milliseconds).
    ReconnectInterval(u64),
}

impl SseEvent {
    pub fn data(&self) -> Option<&str> {
        match self {
            SseEvent::Event { data, .. } => Some(data),
            SseEvent::ReconnectInterval(_) => None,
        }
    }
}

/// Line-buffered SSE parser.
pub struct SseParser {
    /// Bytes of the line currently being received.
    buffer: Vec<u8>,
    /// Data lines of the event being accumulated, each followed by `\n`.
    data: Option<String>,
    event_type: Option<String>,
    last_event_id: Option<String>,
    reconnect_interval: Option<u64>,
    bom_checked: bool,
    max_buffered: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED_BYTES)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: Vec::new(),
            data: None,
            event_type: None,
            last_event_id: None,
            reconnect_interval: None,
            bom_checked: false,
            max_buffered,
        }
    }

    /// Last reconnect interval announced by the server.
    pub fn reconnect_interval(&self) -> Option<u64> {
        self.reconnect_interval
    }

    /// Feed one transport chunk, appending every event it completes to `out`
    /// in arrival order.
    ///
    /// Fails once the unterminated remainder grows past the configured cap;
    /// events completed earlier in the same chunk are still in `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<SseEvent>) -> Result<()> {
        self.buffer.extend_from_slice(chunk);

        if !self.bom_checked {
            if self.buffer.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(&self.buffer) {
                return Ok(());
            }
            if self.buffer.starts_with(UTF8_BOM) {
                self.buffer.drain(..UTF8_BOM.len());
            }
            self.bom_checked = true;
        }

        let mut start = 0;
        loop {
            let rest = &self.buffer[start..];
            let Some(pos) = rest.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                break;
            };
            let terminator = if rest[pos] == b'\r' {
                match rest.get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // A trailing CR may be the first half of CRLF.
                    None => break,
                }
            } else {
                1
            };

            let line = match decode_line(&rest[..pos]) {
                Ok(line) => line,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };
            start += pos + terminator;
            self.process_line(&line, out);
        }
        self.buffer.drain(..start);

        let pending = self.buffer.len() + self.data.as_ref().map_or(0, String::len);
        if pending > self.max_buffered {
            self.reset();
            return Err(Error::MalformedEvent(format!(
                "SSE event exceeds {} bytes without a terminator",
                self.max_buffered
            )));
        }

        Ok(())
    }

    /// Signal end of input.
    ///
    /// A line held back only because it ended in a bare CR is completed. Any
    /// event that never saw its blank line is discarded.
    pub fn finish(&mut self, out: &mut Vec<SseEvent>) -> Result<()> {
        if self.buffer.last() == Some(&b'\r') {
            self.buffer.pop();
            let decoded = decode_line(&self.buffer);
            self.buffer.clear();
            match decoded {
                Ok(line) => self.process_line(&line, out),
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }

        if self.data.is_some() || !self.buffer.is_empty() {
            tracing::debug!(
                buffered = self.buffer.len(),
                "Discarding unterminated SSE event at end of stream"
            );
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.data = None;
        self.event_type = None;
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                let data = self.data.get_or_insert_with(String::new);
                data.push_str(value);
                data.push('\n');
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.reconnect_interval = Some(ms);
                        out.push(SseEvent::ReconnectInterval(ms));
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        let event_type = self.event_type.take();
        let Some(mut data) = self.data.take() else {
            return;
        };
        data.pop();

        out.push(SseEvent::Event {
            event: event_type,
            id: self.last_event_id.clone(),
            data,
        });
    }
}

/// A complete line must be valid UTF-8; a line split mid-character is never
/// decoded before its terminator arrives.
fn decode_line(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| Error::MalformedEvent(format!("SSE line is not valid UTF-8: {}", e)))
}
