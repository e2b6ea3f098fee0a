//! XML-ish tool-call form: `<tool_use><name>...</name><arguments>...</arguments></tool_use>`,
//! used by the Z.ai, Qwen domestic, and Qwen-AI adapters instead of the
//! bracketed `[function_calls]` grammar.
//!
//! Shares the same buffering discipline as [`super::ToolCallInterceptor`]
//! (suppress-while-buffering, safety cap, no content after the first call)
//! but keyed off `<tool_use>` / `</tool_use>` instead.

use stream_event::{AdapterEvent, FinishReason};

pub(super) const OPEN_MARKER: &str = "<tool_use>";
const CLOSE_MARKER: &str = "</tool_use>";
const NAME_OPEN: &str = "<name>";
const NAME_CLOSE: &str = "</name>";
const ARGS_OPEN: &str = "<arguments>";
const ARGS_CLOSE: &str = "</arguments>";
const MAX_BUFFER_BYTES: usize = 500_000;

pub struct XmlToolCallInterceptor {
    content_buffer: String,
    is_buffering: bool,
    tool_call_index: u32,
    has_emitted_tool_call: bool,
}

impl Default for XmlToolCallInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl XmlToolCallInterceptor {
    pub fn new() -> Self {
        Self {
            content_buffer: String::new(),
            is_buffering: false,
            tool_call_index: 0,
            has_emitted_tool_call: false,
        }
    }

    pub fn has_emitted_tool_call(&self) -> bool {
        self.has_emitted_tool_call
    }

    pub fn push(&mut self, c: &str) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        self.content_buffer.push_str(c);

        if !self.is_buffering {
            if let Some(idx) = self.content_buffer.find(OPEN_MARKER) {
                let prefix = self.content_buffer[..idx].to_string();
                self.emit_content(&mut out, prefix);
                self.content_buffer = self.content_buffer[idx..].to_string();
                self.is_buffering = true;
            } else if let Some(prefix_len) = super::longest_suffix_prefix_of_marker(&self.content_buffer, OPEN_MARKER) {
                let head_len = self.content_buffer.len() - prefix_len;
                if head_len > 0 {
                    let head = self.content_buffer[..head_len].to_string();
                    self.emit_content(&mut out, head);
                    self.content_buffer = self.content_buffer[head_len..].to_string();
                }
            } else {
                let whole = std::mem::take(&mut self.content_buffer);
                self.emit_content(&mut out, whole);
            }
        }

        if self.is_buffering {
            self.drain_calls(&mut out);
            if self.content_buffer.len() > MAX_BUFFER_BYTES && !self.has_emitted_tool_call {
                let whole = std::mem::take(&mut self.content_buffer);
                self.emit_content(&mut out, whole);
                self.is_buffering = false;
            }
        }

        out
    }

    fn drain_calls(&mut self, out: &mut Vec<AdapterEvent>) {
        loop {
            let Some(name_start_rel) = self.content_buffer.find(NAME_OPEN) else {
                break;
            };
            let name_start = name_start_rel + NAME_OPEN.len();
            let Some(name_end_rel) = self.content_buffer[name_start..].find(NAME_CLOSE) else {
                break;
            };
            let name_end = name_start + name_end_rel;
            let Some(args_start_rel) = self.content_buffer[name_end..].find(ARGS_OPEN) else {
                break;
            };
            let args_start = name_end + args_start_rel + ARGS_OPEN.len();
            let Some(args_end_rel) = self.content_buffer[args_start..].find(ARGS_CLOSE) else {
                break;
            };
            let args_end = args_start + args_end_rel;
            let Some(close_rel) = self.content_buffer[args_end..].find(CLOSE_MARKER) else {
                break;
            };
            let consumed_end = args_end + close_rel + CLOSE_MARKER.len();

            let name = self.content_buffer[name_start..name_end].to_string();
            let arguments = self.content_buffer[args_start..args_end].to_string();

            out.push(AdapterEvent::ToolCallDelta {
                index: self.tool_call_index,
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name,
                arguments,
            });
            self.tool_call_index += 1;
            self.has_emitted_tool_call = true;
            self.content_buffer = self.content_buffer[consumed_end..].to_string();
        }

        if !self.content_buffer.contains(NAME_OPEN) && self.content_buffer.contains(CLOSE_MARKER) {
            self.content_buffer.clear();
            self.is_buffering = false;
        }
    }

    fn emit_content(&self, out: &mut Vec<AdapterEvent>, text: String) {
        if self.has_emitted_tool_call || text.is_empty() {
            return;
        }
        out.push(AdapterEvent::ContentDelta(text));
    }

    pub fn finish(mut self) -> Vec<AdapterEvent> {
        let mut out = Vec::new();
        if self.is_buffering {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_xml_tool_call() {
        let mut interceptor = XmlToolCallInterceptor::new();
        let mut events = interceptor.push(
            "ok <tool_use><name>search</name><arguments>{\"q\":\"go\"}</arguments></tool_use>",
        );
        events.extend(interceptor.finish());
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ToolCallDelta { name, arguments, .. } => Some((name.clone(), arguments.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![("search".to_string(), "{\"q\":\"go\"}".to_string())]);
        assert!(matches!(events.last(), Some(AdapterEvent::Finish(FinishReason::ToolCalls))));
    }

    #[test]
    fn plain_text_with_no_markup_passes_through() {
        let mut interceptor = XmlToolCallInterceptor::new();
        let mut events = interceptor.push("just text");
        events.extend(interceptor.finish());
        let contents: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::ContentDelta(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["just text"]);
    }
}
