//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads a byte stream, splits on SSE boundaries (`data: …\n\n`), parses each
//! chunk as JSON, and reassembles text and fragmented tool calls into a
//! single [`Completion`].

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, ChunkToolCall, ToolCall};

// ─── SSE Decoder ─────────────────────────────────────────────────────────────

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental SSE framing over arbitrary byte chunks.
///
/// Bytes are buffered raw and only complete lines are decoded, so a UTF-8
/// sequence or a `\r\n` pair split across chunks survives intact. Lines may
/// end in `\n`, `\r\n` or a lone `\r`; a blank line dispatches the event.
///
/// Also used by the MCP SSE transport, which needs the `event:` name.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete event, skipping comments and keep-alives.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(line) = self.next_line() {
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Some(event);
                }
            } else {
                self.field(&line);
            }
        }
        None
    }

    /// Flush whatever remains once the stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if let Some(event) = self.next_event() {
            return Some(event);
        }
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let line = rest.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            self.field(line);
        }
        self.dispatch()
    }

    /// Take one terminated line off the buffer, without its terminator.
    ///
    /// A trailing `\r` is held back until the next byte shows whether it
    /// starts a `\r\n` pair.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|b| matches!(b, b'\n' | b'\r'))?;
        let terminator = match (self.buffer[pos], self.buffer.get(pos + 1)) {
            (b'\r', None) => return None,
            (b'\r', Some(b'\n')) => 2,
            _ => 1,
        };
        let line = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
        self.buffer.drain(..pos + terminator);
        Some(line)
    }

    fn field(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim().to_string());
        }
        // `id:`, `retry:` and `:` comments are ignored
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if data.is_empty() && event.is_none() {
            return None;
        }
        Some(SseEvent {
            event,
            data: data.join("\n"),
        })
    }
}

// ─── Chunk Stream ────────────────────────────────────────────────────────────

/// Turn an HTTP byte stream into a stream of parsed completion chunks.
///
/// Terminates on `[DONE]` or end of body.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<ChatCompletionChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (byte_stream, SseDecoder::new(), false),
        |(mut byte_stream, mut decoder, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(event) = decoder.next_event() {
                    match decode_chunk(&event.data) {
                        Some(item) => return Some((item, (byte_stream, decoder, false))),
                        None if event.data.trim() == "[DONE]" => return None,
                        None => continue,
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => decoder.push(bytes.as_ref()),
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, decoder, true),
                        ));
                    }
                    None => {
                        let item = decoder.finish().and_then(|event| decode_chunk(&event.data));
                        return item.map(|item| (item, (byte_stream, decoder, true)));
                    }
                }
            }
        },
    )
}

/// Decode one `data:` payload. `None` for `[DONE]` and empty payloads.
fn decode_chunk(data: &str) -> Option<Result<ChatCompletionChunk, InferenceError>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(
        serde_json::from_str(data).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse SSE chunk: {e} (data: {data})"),
        }),
    )
}

// ─── Tool Call Accumulator ───────────────────────────────────────────────────

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles streamed tool-call fragments keyed by call id.
///
/// A fragment carrying an id starts (or rejoins) that call; a fragment
/// without one continues the most recently seen call. An id-less fragment
/// before any id has been seen is a protocol error.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PendingCall>,
    current: Option<usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &ChunkToolCall) -> Result<(), InferenceError> {
        let slot = match fragment.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => match self.calls.iter().position(|c| c.id == id) {
                Some(pos) => pos,
                None => {
                    self.calls.push(PendingCall {
                        id: id.to_string(),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    self.calls.len() - 1
                }
            },
            None => self.current.ok_or_else(|| InferenceError::ToolCallMergeError {
                reason: "tool call fragment without id and no preceding call".to_string(),
            })?,
        };
        self.current = Some(slot);

        if let Some(function) = &fragment.function {
            let call = &mut self.calls[slot];
            if let Some(name) = &function.name {
                call.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                call.arguments.push_str(arguments);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Complete calls in first-seen order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|c| ToolCall::new(c.id, c.name, c.arguments))
            .collect()
    }
}

// ─── Completion ──────────────────────────────────────────────────────────────

/// Fully assembled model output.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Drain a chunk stream into a [`Completion`].
pub async fn collect_stream<S>(stream: S) -> Result<Completion, InferenceError>
where
    S: Stream<Item = Result<ChatCompletionChunk, InferenceError>>,
{
    futures::pin_mut!(stream);
    let mut content = String::new();
    let mut accumulator = ToolCallAccumulator::new();
    let mut finish_reason = None;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            continue;
        };
        if let Some(token) = choice.delta.content {
            content.push_str(&token);
        }
        for fragment in choice.delta.tool_calls.iter().flatten() {
            accumulator.push(fragment)?;
        }
        if choice.finish_reason.is_some() {
            finish_reason = choice.finish_reason;
        }
    }

    Ok(Completion {
        content,
        tool_calls: accumulator.finish(),
        finish_reason,
    })
}

/// Parse a non-streaming response body.
pub fn parse_non_streaming_response(body: &str) -> Result<Completion, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        #[serde(default)]
        choices: Vec<NonStreamChoice>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        #[serde(default)]
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        tool_calls: Option<Vec<ToolCall>>,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::InvalidResponse {
            reason: format!("failed to parse response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::EmptyResponse)?;

    Ok(Completion {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: choice.message.tool_calls.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::ChunkFunction;

    fn fragment(id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ChunkToolCall {
        ChunkToolCall {
            index: None,
            id: id.map(String::from),
            function: Some(ChunkFunction {
                name: name.map(String::from),
                arguments: args.map(String::from),
            }),
        }
    }

    fn body_stream(
        parts: Vec<&'static str>,
    ) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    #[test]
    fn test_merge_continuation_without_id() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&fragment(Some("a"), Some("get_"), None)).unwrap();
        acc.push(&fragment(Some("a"), Some("status"), None)).unwrap();
        acc.push(&fragment(None, None, Some("{}"))).unwrap();

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[0].function.name, "get_status");
        assert_eq!(calls[0].function.arguments, "{}");
    }

    #[test]
    fn test_merge_fragment_without_prior_id_errors() {
        let mut acc = ToolCallAccumulator::new();
        let err = acc.push(&fragment(None, Some("x"), None)).unwrap_err();
        assert!(matches!(err, InferenceError::ToolCallMergeError { .. }));
    }

    #[test]
    fn test_merge_multiple_calls_keep_first_seen_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&fragment(Some("b"), Some("list_dbs"), Some("{"))).unwrap();
        acc.push(&fragment(Some("a"), Some("describe"), Some("{\"t\":"))).unwrap();
        acc.push(&fragment(None, None, Some("1}"))).unwrap();
        acc.push(&fragment(Some("b"), None, Some("}"))).unwrap();

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "b");
        assert_eq!(calls[0].function.arguments, "{}");
        assert_eq!(calls[1].id, "a");
        assert_eq!(calls[1].function.arguments, "{\"t\":1}");
    }

    #[test]
    fn test_sse_decoder_splits_across_chunks() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: endpoint\r\ndata: /messages?session");
        assert!(decoder.next_event().is_none());
        decoder.push(b"_id=1\r\n\r\n: ping\n\n");
        let event = decoder.next_event().unwrap();
        assert_eq!(event.event.as_deref(), Some("endpoint"));
        assert_eq!(event.data, "/messages?session_id=1");
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn test_sse_decoder_joins_crlf_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: message\r\ndata: {\"id\":1}\r\n\r");
        assert!(decoder.next_event().is_none());
        decoder.push(b"\nevent: message\r\ndata: {\"id\":2}\r\n\r\n");

        let first = decoder.next_event().unwrap();
        assert_eq!(first.event.as_deref(), Some("message"));
        assert_eq!(first.data, "{\"id\":1}");
        let second = decoder.next_event().unwrap();
        assert_eq!(second.data, "{\"id\":2}");
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn test_sse_decoder_accepts_lone_cr_line_endings() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: a\rdata: b\r\rdata: c\r");
        assert_eq!(decoder.next_event().unwrap().data, "a\nb");
        assert!(decoder.next_event().is_none());
        assert_eq!(decoder.finish().unwrap().data, "c");
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let bytes = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let parts = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
        let body = stream::iter(parts.into_iter().map(Ok::<_, std::io::Error>));

        let completion = collect_stream(parse_sse_stream(body)).await.unwrap();
        assert_eq!(completion.content, "你好");
    }

    #[tokio::test]
    async fn test_collect_streamed_text() {
        let body = body_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let completion = collect_stream(parse_sse_stream(body)).await.unwrap();
        assert_eq!(completion.content, "Hello");
        assert!(completion.tool_calls.is_empty());
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_collect_streamed_tool_call() {
        let body = body_stream(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"mysql_\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"name\":\"execution\",\"arguments\":\"{\\\"sql\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"select 1\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let completion = collect_stream(parse_sse_stream(body)).await.unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].function.name, "mysql_execution");
        assert_eq!(
            completion.tool_calls[0].function.arguments,
            "{\"sql\":\"select 1\"}"
        );
    }

    #[tokio::test]
    async fn test_stream_without_trailing_blank_line() {
        let body = body_stream(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}"]);
        let completion = collect_stream(parse_sse_stream(body)).await.unwrap();
        assert_eq!(completion.content, "ok");
    }

    #[tokio::test]
    async fn test_stream_bad_json_is_stream_error() {
        let body = body_stream(vec!["data: {not json}\n\n"]);
        let err = collect_stream(parse_sse_stream(body)).await.unwrap_err();
        assert!(matches!(err, InferenceError::StreamError { .. }));
    }

    #[test]
    fn test_parse_non_streaming_with_content() {
        let body = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": "Hello, world!"},
                "finish_reason": "stop"
            }]
        }"#;
        let completion = parse_non_streaming_response(body).unwrap();
        assert_eq!(completion.content, "Hello, world!");
        assert!(completion.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_non_streaming_with_tool_calls() {
        let body = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "list_tables", "arguments": "{\"db\": \"shop\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let completion = parse_non_streaming_response(body).unwrap();
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls[0].function.name, "list_tables");
    }

    #[test]
    fn test_parse_non_streaming_empty_choices() {
        let err = parse_non_streaming_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, InferenceError::EmptyResponse));
    }
}
