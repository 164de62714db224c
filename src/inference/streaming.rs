//! SSE streaming parser for Responses API streams.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`event: …\ndata: …\n\n`), and parses each `data:` payload as a typed
//! [`ResponseEvent`]. Events the engine does not act on are filtered out here
//! so consumers only see item lifecycle, text deltas, and terminal events.

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::types::{ResponseEvent, ResponseSnapshot};

// ─── SSE event parser ────────────────────────────────────────────────────────

/// Parse a streamed HTTP body into `ResponseEvent`s.
///
/// Raw bytes are buffered until a blank-line event boundary is seen, so an
/// event split across TCP reads is reassembled before parsing. Only complete
/// events are decoded as UTF-8, which keeps multi-byte characters split
/// between reads intact.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ResponseEvent, InferenceError>> {
    parse_sse_bytes(response.bytes_stream())
}

/// Byte-stream form of [`parse_sse_stream`], independent of the HTTP client.
pub fn parse_sse_bytes<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<ResponseEvent, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (byte_stream, Vec::<u8>::new(), false),
        |(mut byte_stream, mut buffer, mut finished)| async move {
            loop {
                if let Some((event_end, sep_len)) = find_event_boundary(&buffer) {
                    let raw: Vec<u8> = buffer.drain(..event_end + sep_len).take(event_end).collect();

                    match parse_event(&String::from_utf8_lossy(&raw)) {
                        Ok(Some(event)) => {
                            return Some((Ok(event), (byte_stream, buffer, finished)))
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (byte_stream, buffer, finished))),
                    }
                }

                if finished {
                    return None;
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(bytes.as_ref());
                    }
                    Some(Err(e)) => {
                        finished = true;
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, buffer, finished),
                        ));
                    }
                    None => {
                        // Flush a trailing event that lacked the final blank line.
                        finished = true;
                        let tail = std::mem::take(&mut buffer);
                        let rest = String::from_utf8_lossy(&tail);
                        if rest.trim().is_empty() {
                            return None;
                        }
                        match parse_event(rest.trim()) {
                            Ok(Some(event)) => {
                                return Some((Ok(event), (byte_stream, buffer, finished)))
                            }
                            Ok(None) => return None,
                            Err(e) => return Some((Err(e), (byte_stream, buffer, finished))),
                        }
                    }
                }
            }
        },
    )
}

/// Byte position and length of the first `\n\n` or `\r\n\r\n` separator.
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find_bytes(buffer, b"\n\n").map(|i| (i, 2));
    let crlf = find_bytes(buffer, b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse one SSE event block. Returns `Ok(None)` for keep-alives, `[DONE]`,
/// and event types the engine ignores.
fn parse_event(raw: &str) -> Result<Option<ResponseEvent>, InferenceError> {
    let mut data = String::new();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.trim();
            if rest == "[DONE]" {
                return Ok(None);
            }
            data.push_str(rest);
        }
    }

    if data.is_empty() {
        return Ok(None);
    }

    let event: ResponseEvent =
        serde_json::from_str(&data).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse SSE event: {e} (data: {data})"),
        })?;

    match event {
        ResponseEvent::Other => Ok(None),
        ResponseEvent::Failed { response } => Err(failed_response_error(&response)),
        ResponseEvent::Error { code, message } => {
            Err(InferenceError::ResponseFailed { code, message })
        }
        other => Ok(Some(other)),
    }
}

/// Build the error for a `response.failed` snapshot.
pub(crate) fn failed_response_error(response: &ResponseSnapshot) -> InferenceError {
    match &response.error {
        Some(err) => InferenceError::ResponseFailed {
            code: err.code.clone(),
            message: err.message.clone(),
        },
        None => InferenceError::ResponseFailed {
            code: None,
            message: format!("response {} failed without details", response.id),
        },
    }
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming response body into its snapshot.
///
/// A body whose `status` is `failed` is surfaced as `ResponseFailed`.
pub fn parse_non_streaming_response(body: &str) -> Result<ResponseSnapshot, InferenceError> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        #[serde(default)]
        status: Option<String>,
        #[serde(flatten)]
        snapshot: ResponseSnapshot,
    }

    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse response body: {e}"),
        })?;

    if envelope.status.as_deref() == Some("failed") || envelope.snapshot.error.is_some() {
        return Err(failed_response_error(&envelope.snapshot));
    }
    Ok(envelope.snapshot)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
