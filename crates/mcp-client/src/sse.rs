//! Server-sent event framing for the stream transport.
//!
//! A streamable HTTP server may answer a POST with `text/event-stream`;
//! each event's `data:` payload is one JSON-RPC message.

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by a blank line. Multiple `data:` lines in one event
/// are joined with `\n`; `event:`, `id:`, `retry:` and comment lines are
/// ignored.
///
/// The buffer is drained in-place: consumed bytes are removed and any
/// trailing partial event remains for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
            .collect();

        if data.is_empty() {
            continue;
        }
        let payload = data.join("\n");
        if !payload.trim().is_empty() {
            payloads.push(payload);
        }
    }

    payloads
}

/// Decode `chunk` as UTF-8, prefixed by bytes held back from the last call.
///
/// An incomplete sequence at the end of the input stays in `pending` until
/// the rest of the character arrives. Invalid bytes become U+FFFD.
pub(crate) fn decode_utf8(pending: &mut Vec<u8>, chunk: &[u8]) -> String {
    pending.extend_from_slice(chunk);
    let mut text = String::new();
    let mut start = 0;
    loop {
        match std::str::from_utf8(&pending[start..]) {
            Ok(rest) => {
                text.push_str(rest);
                start = pending.len();
                break;
            }
            Err(e) => {
                let valid_end = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[start..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_end + len;
                    }
                    None => {
                        start = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..start);
    text
}

/// Whether a `Content-Type` header value names an event stream.
pub(crate) fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .eq_ignore_ascii_case("text/event-stream")
}
