//! Streaming tool-call interceptor: scans outbound text deltas for a
//! `[function_calls]...[/function_calls]` block, suppresses raw text
//! emission while buffering, parses `[call:NAME]ARGS[/call]` entries, and
//! re-emits them as `tool_calls` deltas with `finish_reason = tool_calls`.
//!
//! This is a decorator around the sink: it owns no network state, only
//! a buffer and a latch tracking whether a tool call has started, and
//! produces [`AdapterEvent`]s that the HTTP layer renders as SSE.

pub mod xml;

use stream_event::{AdapterEvent, FinishReason};

const OPEN_MARKER: &str = "[function_calls]";
const CLOSE_MARKER: &str = "[/function_calls]";
const CALL_OPEN_PREFIX: &str = "[call:";
const CALL_CLOSE: &str = "[/call]";
/// Buffer safety cap — flush as content and disable buffering if no
/// complete call has been parsed by the time the buffer hits this size.
const MAX_BUFFER_BYTES: usize = 500_000;

/// Per-stream interceptor state.
pub struct ToolCallInterceptor {
    content_buffer: String,
    is_buffering_tool_call: bool,
    tool_call_index: u32,
    has_emitted_tool_call: bool,
}

impl Default for ToolCallInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallInterceptor {
    pub fn new() -> Self {
        Self {
            content_buffer: String::new(),
            is_buffering_tool_call: false,
            tool_call_index: 0,
            has_emitted_tool_call: false,
        }
    }

    pub fn has_emitted_tool_call(&self) -> bool {
        self.has_emitted_tool_call
    }

    /// Feeds one incoming text delta `c` through the state machine,
    /// returning the [`AdapterEvent`]s to emit, in
    /// order. Once a tool call has been emitted, no further content-only
    /// delta is produced on this stream — later buffered
    /// content is silently dropped.
    pub fn push(&mut self, c: &str) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        self.content_buffer.push_str(c);

        if !self.is_buffering_tool_call {
            if let Some(idx) = self.content_buffer.find(OPEN_MARKER) {
                let prefix = self.content_buffer[..idx].to_string();
                if !prefix.is_empty() {
                    self.emit_content(&mut out, prefix);
                }
                let rest = self.content_buffer[idx..].to_string();
                self.content_buffer = rest;
                self.is_buffering_tool_call = true;
            } else if let Some(prefix_len) = longest_suffix_prefix_of_marker(&self.content_buffer, OPEN_MARKER) {
                let head_len = self.content_buffer.len() - prefix_len;
                if head_len > 0 {
                    let head = self.content_buffer[..head_len].to_string();
                    self.emit_content(&mut out, head);
                    self.content_buffer = self.content_buffer[head_len..].to_string();
                }
                // else: whole buffer is a prefix of the marker; keep waiting.
            } else {
                let whole = std::mem::take(&mut self.content_buffer);
                if !whole.is_empty() {
                    self.emit_content(&mut out, whole);
                }
            }
        }

        if self.is_buffering_tool_call {
            self.drain_calls(&mut out);

            if self.content_buffer.len() > MAX_BUFFER_BYTES && !self.has_emitted_tool_call {
                // False positive: flush the whole thing as content and give up buffering.
                let whole = std::mem::take(&mut self.content_buffer);
                self.emit_content(&mut out, whole);
                self.is_buffering_tool_call = false;
            }
        }

        out
    }

    /// Parses zero or more complete `[call:NAME]ARGS[/call]` entries out of
    /// the buffer, in order, emitting a `ToolCallDelta` for each. Exits
    /// buffering mode (discarding any trailing noise) once
    /// `[/function_calls]` is consumed.
    fn drain_calls(&mut self, out: &mut Vec<AdapterEvent>) {
        loop {
            if let Some(rel) = self.content_buffer.find(CALL_OPEN_PREFIX) {
                let after_prefix = rel + CALL_OPEN_PREFIX.len();
                let Some(name_end_rel) = self.content_buffer[after_prefix..].find(']') else {
                    break; // name not fully arrived yet
                };
                let name_end = after_prefix + name_end_rel;
                let name = self.content_buffer[after_prefix..name_end].to_string();
                let args_start = name_end + 1;
                let Some(close_rel) = self.content_buffer[args_start..].find(CALL_CLOSE) else {
                    break; // arguments not fully arrived yet
                };
                let close_abs = args_start + close_rel;
                let arguments = self.content_buffer[args_start..close_abs].to_string();
                let consumed_end = close_abs + CALL_CLOSE.len();

                out.push(AdapterEvent::ToolCallDelta {
                    index: self.tool_call_index,
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name,
                    arguments,
                });
                self.tool_call_index += 1;
                self.has_emitted_tool_call = true;
                self.content_buffer = self.content_buffer[consumed_end..].to_string();
                continue;
            }

            if let Some(close_idx) = self.content_buffer.find(CLOSE_MARKER) {
                self.content_buffer.clear();
                let _ = close_idx;
                self.is_buffering_tool_call = false;
            }
            break;
        }
    }

    fn emit_content(&self, out: &mut Vec<AdapterEvent>, text: String) {
        if self.has_emitted_tool_call {
            return; // no plain-text delta may follow the first tool call
        }
        if !text.is_empty() {
            out.push(AdapterEvent::ContentDelta(text));
        }
    }

    /// Stream finalization: one last parse attempt on any residual
    /// buffer, then the terminal `finish_reason` chunk.
    pub fn finish(mut self) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        if self.is_buffering_tool_call {
            self.drain_calls(&mut out);
        } else if !self.content_buffer.is_empty() && !self.has_emitted_tool_call {
            let text = std::mem::take(&mut self.content_buffer);
            out.push(AdapterEvent::ContentDelta(text));
        }
        let reason = if self.has_emitted_tool_call {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };
        out.push(AdapterEvent::Finish(reason));
        out
    }
}

/// One of the two grammars a stream can commit to once its opening marker
/// is seen in full.
enum Chosen {
    Bracketed(ToolCallInterceptor),
    Xml(xml::XmlToolCallInterceptor),
}

/// Detects either the bracketed `[function_calls]...[/function_calls]` form
/// or the `<tool_use>...</tool_use>` XML form on the same stream, committing
/// to whichever grammar's opening marker actually appears first.
///
/// Z.ai's documented wire format uses the XML form, but spec scenario S2
/// pins Z.ai to the bracketed form instead; rather than guess which one a
/// given deployment emits, sniff both until one marker completes, then
/// delegate entirely to that grammar's own interceptor (replaying
/// whatever was held during the sniff).
pub struct DualToolCallInterceptor {
    sniff_buffer: String,
    chosen: Option<Chosen>,
}

impl Default for DualToolCallInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl DualToolCallInterceptor {
    pub fn new() -> Self {
        Self {
            sniff_buffer: String::new(),
            chosen: None,
        }
    }

    pub fn has_emitted_tool_call(&self) -> bool {
        match &self.chosen {
            Some(Chosen::Bracketed(i)) => i.has_emitted_tool_call(),
            Some(Chosen::Xml(i)) => i.has_emitted_tool_call(),
            None => false,
        }
    }

    pub fn push(&mut self, c: &str) -> Vec<AdapterEvent> {
        if let Some(chosen) = &mut self.chosen {
            return match chosen {
                Chosen::Bracketed(i) => i.push(c),
                Chosen::Xml(i) => i.push(c),
            };
        }

        self.sniff_buffer.push_str(c);

        if self.sniff_buffer.contains(OPEN_MARKER) {
            let buf = std::mem::take(&mut self.sniff_buffer);
            let mut inner = ToolCallInterceptor::new();
            let out = inner.push(&buf);
            self.chosen = Some(Chosen::Bracketed(inner));
            return out;
        }
        if self.sniff_buffer.contains(xml::OPEN_MARKER) {
            let buf = std::mem::take(&mut self.sniff_buffer);
            let mut inner = xml::XmlToolCallInterceptor::new();
            let out = inner.push(&buf);
            self.chosen = Some(Chosen::Xml(inner));
            return out;
        }

        // Neither marker is complete yet. Keep only whatever suffix could
        // still grow into either marker; flush the rest as plain content.
        let bracket_keep = longest_suffix_prefix_of_marker(&self.sniff_buffer, OPEN_MARKER).unwrap_or(0);
        let xml_keep = longest_suffix_prefix_of_marker(&self.sniff_buffer, xml::OPEN_MARKER).unwrap_or(0);
        let keep = bracket_keep.max(xml_keep);
        let head_len = self.sniff_buffer.len() - keep;
        if head_len == 0 {
            return Vec::new();
        }
        let head: String = self.sniff_buffer.drain(..head_len).collect();
        if head.is_empty() {
            Vec::new()
        } else {
            vec![AdapterEvent::ContentDelta(head)]
        }
    }

    pub fn finish(self) -> Vec<AdapterEvent> {
        match self.chosen {
            Some(Chosen::Bracketed(i)) => i.finish(),
            Some(Chosen::Xml(i)) => i.finish(),
            None => {
                let mut out = Vec::new();
                if !self.sniff_buffer.is_empty() {
                    out.push(AdapterEvent::ContentDelta(self.sniff_buffer));
                }
                out.push(AdapterEvent::Finish(FinishReason::Stop));
                out
            }
        }
    }
}

/// Length of the longest proper, non-empty prefix of `marker` that `buf`
/// ends with, or `None` if `buf` does not end with any prefix of `marker`.
///
/// Only considers byte lengths that land on a UTF-8 char boundary in `buf` —
/// a content delta ending mid-codepoint (e.g. a CJK delta split across
/// network chunks) must never be sliced at an arbitrary byte offset.
fn longest_suffix_prefix_of_marker(buf: &str, marker: &str) -> Option<usize> {
    let max_len = marker.len().saturating_sub(1).min(buf.len());
    for len in (1..=max_len).rev() {
        let start = buf.len() - len;
        if !buf.is_char_boundary(start) {
            continue;
        }
        let suffix = &buf[start..];
        if marker.starts_with(suffix) {
            return Some(len);
        }
    }
    None
}

#[cfg(test)]
mod boundary_tests {
    use super::longest_suffix_prefix_of_marker;

    #[test]
    fn does_not_panic_on_multi_byte_suffix() {
        // "你好" is 6 bytes; every byte offset 1..=5 must be probed safely.
        assert_eq!(longest_suffix_prefix_of_marker("你好", OPEN_MARKER), None);
    }

    #[test]
    fn still_detects_ascii_prefix_after_cjk_text() {
        let buf = format!("你好[function_cal");
        let found = longest_suffix_prefix_of_marker(&buf, OPEN_MARKER);
        assert_eq!(found, Some("[function_cal".len()));
    }
}

/// One parsed tool invocation from the non-streaming parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: String,
}

/// Result of the non-streaming parse: mirrors
/// OpenAI's non-stream semantics — either plain content, or `null` content
/// plus tool calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonStreamParse {
    pub cleaned_content: Option<String>,
    pub tool_calls: Vec<ParsedToolCall>,
}

/// Runs the same parser once over fully-accumulated text; must agree with
/// the streaming emission for the same input.
pub fn parse_non_streaming(full_text: &str) -> NonStreamParse {
    let Some(open_idx) = full_text.find(OPEN_MARKER) else {
        return NonStreamParse {
            cleaned_content: Some(full_text.to_string()),
            tool_calls: Vec::new(),
        };
    };
    let prefix = &full_text[..open_idx];
    let mut rest = &full_text[open_idx + OPEN_MARKER.len()..];
    let mut calls = Vec::new();
    loop {
        let Some(rel) = rest.find(CALL_OPEN_PREFIX) else {
            break;
        };
        let after_prefix = rel + CALL_OPEN_PREFIX.len();
        let Some(name_end_rel) = rest[after_prefix..].find(']') else {
            break;
        };
        let name_end = after_prefix + name_end_rel;
        let name = rest[after_prefix..name_end].to_string();
        let args_start = name_end + 1;
        let Some(close_rel) = rest[args_start..].find(CALL_CLOSE) else {
            break;
        };
        let close_abs = args_start + close_rel;
        let arguments = rest[args_start..close_abs].to_string();
        calls.push(ParsedToolCall { name, arguments });
        rest = &rest[close_abs + CALL_CLOSE.len()..];
    }

    if calls.is_empty() {
        return NonStreamParse {
            cleaned_content: Some(full_text.to_string()),
            tool_calls: Vec::new(),
        };
    }

    let cleaned = if prefix.is_empty() { None } else { Some(prefix.to_string()) };
    NonStreamParse {
        cleaned_content: cleaned,
        tool_calls: calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_all(deltas: &[&str]) -> (Vec<AdapterEvent>, ToolCallInterceptor) {
        let mut interceptor = ToolCallInterceptor::new();
        let mut events = Vec::new();
        for d in deltas {
            events.extend(interceptor.push(d));
        }
        (events, interceptor)
    }

    fn contents(events: &[AdapterEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ContentDelta(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let (events, interceptor) = run_all(&["hello ", "world"]);
        assert_eq!(contents(&events), vec!["hello ", "world"]);
        let finish = interceptor.finish();
        assert!(matches!(finish.last(), Some(AdapterEvent::Finish(FinishReason::Stop))));
    }

    #[test]
    fn single_call_is_parsed_and_terminal_reason_is_tool_calls() {
        let (mut events, interceptor) = run_all(&[
            "sure ",
            "[function_calls][call:search]{\"q\":\"go\"}[/call][/function_calls]",
        ]);
        events.extend(interceptor.finish());

        assert_eq!(contents(&events), vec!["sure "]);
        let tool_calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ToolCallDelta { name, arguments, .. } => Some((name.clone(), arguments.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(tool_calls, vec![("search".to_string(), "{\"q\":\"go\"}".to_string())]);
        assert!(matches!(events.last(), Some(AdapterEvent::Finish(FinishReason::ToolCalls))));
    }

    #[test]
    fn opening_marker_split_at_every_cut_point_is_still_detected() {
        let marker = "[function_calls]";
        for cut in 1..marker.len() {
            let (head, tail) = marker.split_at(cut);
            let full_tail = format!("{tail}[call:f]{{}}[/call][/function_calls]");
            let (mut events, interceptor) = run_all(&[head, &full_tail]);
            events.extend(interceptor.finish());
            let leaked: Vec<_> = contents(&events)
                .into_iter()
                .filter(|c| c.contains('[') || c.contains(']'))
                .collect();
            assert!(leaked.is_empty(), "cut at {cut} leaked marker chars: {leaked:?}");
            assert!(events.iter().any(|e| matches!(e, AdapterEvent::ToolCallDelta { .. })));
        }
    }

    #[test]
    fn no_content_after_first_tool_call_even_if_more_text_is_buffered() {
        let (mut events, interceptor) = run_all(&[
            "[function_calls][call:a]{}[/call][/function_calls]trailing noise should never surface",
        ]);
        events.extend(interceptor.finish());
        assert!(contents(&events).is_empty());
    }

    #[test]
    fn safety_cap_flushes_as_content_when_no_call_completes() {
        let mut interceptor = ToolCallInterceptor::new();
        let mut events = Vec::new();
        events.extend(interceptor.push(OPEN_MARKER));
        // Feed well past MAX_BUFFER_BYTES without ever completing a call.
        let chunk = "x".repeat(10_000);
        for _ in 0..60 {
            events.extend(interceptor.push(&chunk));
        }
        events.extend(interceptor.finish());
        assert!(contents(&events).iter().any(|c| c.contains('x')));
        assert!(!events.iter().any(|e| matches!(e, AdapterEvent::ToolCallDelta { .. })));
    }

    #[test]
    fn non_streaming_parser_agrees_with_streaming_for_same_input() {
        let full = "intro text [function_calls][call:lookup]{\"id\":1}[/call][/function_calls]";
        let (mut streamed, interceptor) = run_all(&[full]);
        streamed.extend(interceptor.finish());
        let streamed_calls: Vec<_> = streamed
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ToolCallDelta { name, arguments, .. } => Some((name.clone(), arguments.clone())),
                _ => None,
            })
            .collect();

        let parsed = parse_non_streaming(full);
        assert_eq!(parsed.cleaned_content.as_deref(), Some("intro text "));
        assert_eq!(
            parsed
                .tool_calls
                .iter()
                .map(|c| (c.name.clone(), c.arguments.clone()))
                .collect::<Vec<_>>(),
            streamed_calls
        );
    }

    #[test]
    fn no_marker_at_all_returns_full_text_as_content() {
        let parsed = parse_non_streaming("just a normal reply");
        assert_eq!(parsed.cleaned_content.as_deref(), Some("just a normal reply"));
        assert!(parsed.tool_calls.is_empty());
    }
}

#[cfg(test)]
mod dual_tests {
    use super::*;

    fn contents(events: &[AdapterEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ContentDelta(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn tool_calls(events: &[AdapterEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ToolCallDelta { name, arguments, .. } => Some((name.clone(), arguments.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn detects_bracketed_form_like_zai_scenario_s2() {
        let mut interceptor = DualToolCallInterceptor::new();
        let mut events = interceptor.push("sure [function_calls][call:search]{\"q\":\"go\"}[/call][/function_calls]");
        events.extend(interceptor.finish());
        assert_eq!(contents(&events), vec!["sure "]);
        assert_eq!(tool_calls(&events), vec![("search".to_string(), "{\"q\":\"go\"}".to_string())]);
        assert!(matches!(events.last(), Some(AdapterEvent::Finish(FinishReason::ToolCalls))));
    }

    #[test]
    fn detects_xml_form_on_the_same_interceptor_type() {
        let mut interceptor = DualToolCallInterceptor::new();
        let mut events =
            interceptor.push("ok <tool_use><name>search</name><arguments>{\"q\":\"go\"}</arguments></tool_use>");
        events.extend(interceptor.finish());
        assert_eq!(contents(&events), vec!["ok "]);
        assert_eq!(tool_calls(&events), vec![("search".to_string(), "{\"q\":\"go\"}".to_string())]);
    }

    #[test]
    fn plain_text_with_neither_marker_passes_through() {
        let mut interceptor = DualToolCallInterceptor::new();
        let mut events = interceptor.push("just a normal reply");
        events.extend(interceptor.finish());
        assert_eq!(contents(&events), vec!["just a normal reply"]);
        assert!(matches!(events.last(), Some(AdapterEvent::Finish(FinishReason::Stop))));
    }
}
