//! GLM/Zhipu adapter: refresh-token auth with rotation, MD5 triplet
//! signing, optional file/image upload, and a parts-array SSE response.

use super::support::{byte_stream, classify_error_response, common_headers, transport_err, HTTP};
use crate::adapter::{Adapter, ChatContext, ChatOutcome, SessionHandle};
use crate::cache::CoalescingCache;
use crate::error::AdapterError;
use crate::interceptor::ToolCallInterceptor;
use crate::openai::{flatten_turns, render_labeled_prompt, split_system_prompt, ChatMessage};
use crate::signing::glm_sign;
use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use gateway_store::Store;
use gateway_types::{now_ms, Account};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use stream_event::AdapterEvent;

const BASE: &str = "https://chatglm.cn";
/// Fixed signature secret baked into the web client's bundle.
const GLM_SECRET: &str = "glm_web_client_signature_key";

pub struct GlmAdapter {
    store: Arc<Store>,
    access_token_cache: CoalescingCache<String, String>,
}

impl GlmAdapter {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            access_token_cache: CoalescingCache::new(),
        }
    }

    fn sign_headers(&self, secret: &str) -> (reqwest::header::HeaderMap, i64) {
        let now = now_ms();
        let sig = glm_sign(now, secret);
        let mut headers = common_headers();
        headers.insert("X-Timestamp", sig.timestamp.parse().unwrap());
        headers.insert("X-Nonce", sig.nonce.parse().unwrap());
        headers.insert("X-Sign", sig.sign.parse().unwrap());
        (headers, now)
    }

    async fn access_token(&self, account: &Account) -> Result<String, AdapterError> {
        let refresh_token = account
            .credentials
            .refresh_token()
            .ok_or_else(|| AdapterError::protocol_drift("glm account missing refresh token"))?
            .to_string();

        let account_id = account.id.clone();
        let store = self.store.clone();
        self.access_token_cache
            .get_or_produce(refresh_token.clone(), move || async move {
                let (headers, _) = self.sign_headers_standalone();
                let resp = HTTP
                    .post(format!("{BASE}/chatglm/user-api/user/refresh"))
                    .headers(headers)
                    .json(&json!({"refresh_token": refresh_token}))
                    .send()
                    .await
                    .map_err(transport_err)?;
                let status = resp.status();
                let body = resp.text().await.map_err(transport_err)?;
                if status.as_u16() == 401 {
                    return Err(AdapterError::auth_expired("glm refresh token expired"));
                }
                if !status.is_success() {
                    return Err(classify_error_response(status.as_u16(), &body));
                }
                #[derive(Deserialize)]
                struct RefreshResp {
                    result: RefreshResult,
                }
                #[derive(Deserialize)]
                struct RefreshResult {
                    access_token: String,
                    refresh_token: String,
                }
                let parsed: RefreshResp = serde_json::from_str(&body)
                    .map_err(|e| AdapterError::protocol_drift(format!("refresh decode: {e}")))?;

                if parsed.result.refresh_token != refresh_token {
                    if let Ok(Some(mut current)) = store.get_account(&account_id).await {
                        current.credentials.set("refreshToken", parsed.result.refresh_token.clone());
                        let _ = store.upsert_account(&current).await;
                    }
                }

                Ok((parsed.result.access_token, Duration::from_secs(3600)))
            })
            .await
    }

    /// Standalone signer usable from inside the cache's `produce` closure,
    /// which cannot borrow `&self` across the `move` boundary cleanly.
    fn sign_headers_standalone(&self) -> (reqwest::header::HeaderMap, i64) {
        self.sign_headers(GLM_SECRET)
    }

    /// `POST /backend-api/assistant/file_upload` (multipart): uploads one
    /// decoded attachment and returns the vendor's `source_id`.
    async fn upload_file(&self, access_token: &str, bytes: Vec<u8>, mime: &str) -> Result<String, AdapterError> {
        let filename = synthesized_filename(mime);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| AdapterError::protocol_drift(format!("glm upload mime: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let (headers, _) = self.sign_headers(GLM_SECRET);
        let resp = HTTP
            .post(format!("{BASE}/backend-api/assistant/file_upload"))
            .headers(headers)
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_err)?;
        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(AdapterError::auth_expired("glm access token rejected during upload"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }
        #[derive(Deserialize)]
        struct UploadResp {
            result: UploadResult,
        }
        #[derive(Deserialize)]
        struct UploadResult {
            source_id: String,
        }
        let parsed: UploadResp = serde_json::from_str(&body)
            .map_err(|e| AdapterError::protocol_drift(format!("file_upload decode: {e}")))?;
        Ok(parsed.result.source_id)
    }

    /// Scans `messages` for `image_url`/`file` content parts, uploads each
    /// one, and returns the prefix content blocks referencing the returned
    /// `source_id`s, in encounter order — the blocks the chat payload's
    /// content array is meant to begin with (§4.4.2).
    async fn upload_attachment_blocks(
        &self,
        access_token: &str,
        messages: &[&ChatMessage],
    ) -> Result<Vec<Value>, AdapterError> {
        let mut blocks = Vec::new();
        for m in messages {
            let Some(content) = &m.content else { continue };
            for part in content.parts() {
                if let Some(image) = &part.image_url {
                    let (mime, bytes) = match decode_data_uri(&image.url) {
                        Some(decoded) => decoded,
                        None => continue, // remote (non-data) URLs are sent by reference, no upload needed
                    };
                    let source_id = self.upload_file(access_token, bytes, &mime).await?;
                    blocks.push(json!({"type": "image", "image": {"source_id": source_id}}));
                } else if let Some(file) = &part.file {
                    let Some(data_str) = file.get("data").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let (mime, bytes) = match decode_data_uri(data_str) {
                        Some(decoded) => decoded,
                        None => {
                            let decoded = base64::engine::general_purpose::STANDARD
                                .decode(data_str)
                                .map_err(|e| AdapterError::protocol_drift(format!("glm file part base64: {e}")))?;
                            let mime = file
                                .get("mime_type")
                                .and_then(|v| v.as_str())
                                .map(str::to_string)
                                .unwrap_or_else(|| sniff_mime(&decoded).to_string());
                            (mime, decoded)
                        }
                    };
                    let source_id = self.upload_file(access_token, bytes, &mime).await?;
                    blocks.push(json!({"type": "file", "file": {"source_id": source_id}}));
                }
            }
        }
        Ok(blocks)
    }
}

/// Parses a `data:<mime>[;base64],<payload>` URI into `(mime, decoded bytes)`.
/// Returns `None` for anything that isn't a base64 data URI (e.g. a plain
/// `https://` image URL, which is sent by reference instead of uploaded).
fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    let mime = meta.trim_end_matches(";base64");
    let mime = if mime.is_empty() { "application/octet-stream" } else { mime };
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload).ok()?;
    Some((mime.to_string(), bytes))
}

/// Minimal magic-byte MIME sniff for attachments with no declared content
/// type (a data URI already carries its own mime; this covers the
/// generic `file` part's inline `data` field when `mime_type` is absent).
fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(b"\xff\xd8\xff") {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"%PDF") {
        "application/pdf"
    } else {
        "application/octet-stream"
    }
}

fn synthesized_filename(mime: &str) -> String {
    let ext = match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        _ => "bin",
    };
    format!("upload.{ext}")
}

#[async_trait]
impl Adapter for GlmAdapter {
    fn provider_id(&self) -> &'static str {
        "glm"
    }

    async fn chat(&self, ctx: ChatContext) -> Result<ChatOutcome, AdapterError> {
        let access_token = self.access_token(&ctx.account).await?;

        let (system, rest) = split_system_prompt(&ctx.request.messages);
        let turns = flatten_turns(&rest);
        let prompt = render_labeled_prompt(system.as_deref(), &turns);

        let mut meta_data = serde_json::Map::new();
        if let Some(effort) = &ctx.request.reasoning_effort {
            if !effort.is_empty() {
                meta_data.insert("chat_mode".into(), json!("zero"));
            }
        }
        if ctx.request.deep_research.unwrap_or(false) {
            meta_data.insert("chat_mode".into(), json!("deep_research"));
        }
        if ctx.request.web_search.unwrap_or(false) {
            meta_data.insert("is_networking".into(), json!(true));
        }
        let assistant_id = (ctx.actual_model.len() >= 24 && ctx.actual_model.chars().all(|c| c.is_ascii_alphanumeric()))
            .then(|| ctx.actual_model.clone());

        let mut content_blocks = self.upload_attachment_blocks(&access_token, &rest).await?;
        content_blocks.push(json!({"type": "text", "text": prompt}));
        let mut payload = json!({
            "assistant_id": assistant_id.unwrap_or_else(|| "65940acff940141902d6aff2".to_string()),
            "conversation_id": "",
            "meta_data": meta_data,
            "messages": [{
                "role": "user",
                "content": content_blocks,
            }],
        });
        if let Value::Object(obj) = &mut payload {
            obj.insert("stream".into(), json!(true));
        }

        let (headers, _) = self.sign_headers(GLM_SECRET);
        let resp = HTTP
            .post(format!("{BASE}/backend-api/assistant/stream"))
            .headers(headers)
            .bearer_auth(&access_token)
            .json(&payload)
            .send()
            .await
            .map_err(transport_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                if let Some(rt) = ctx.account.credentials.refresh_token() {
                    self.access_token_cache.evict(&rt.to_string());
                }
                return Err(AdapterError::auth_expired("glm access token rejected"));
            }
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let line_stream = crate::sse::lines(byte_stream(resp));
        let events = Box::pin(async_stream::stream! {
            yield Ok(AdapterEvent::Role("assistant".to_string()));
            let mut interceptor = ToolCallInterceptor::new();
            let mut citation_order: Vec<String> = Vec::new();
            let mut citation_urls: std::collections::HashMap<String, (String, Option<String>)> = std::collections::HashMap::new();
            futures::pin_mut!(line_stream);
            while let Some(line) = line_stream.next().await {
                let line = match line { Ok(l) => l, Err(e) => { yield Err(e); return; } };
                let Some(payload) = crate::sse::data_payload(&line) else { continue };
                if payload.is_empty() { continue }
                let Ok(frame) = serde_json::from_str::<Value>(payload) else { continue };

                if let Some(results) = frame.get("search_result").and_then(|v| v.as_array()) {
                    for item in results {
                        if let (Some(key), Some(url)) = (
                            item.get("match_key").and_then(|v| v.as_str()),
                            item.get("url").and_then(|v| v.as_str()),
                        ) {
                            let title = item.get("title").and_then(|v| v.as_str()).map(str::to_string);
                            citation_urls.insert(key.to_string(), (url.to_string(), title));
                        }
                    }
                }

                if let Some(status_str) = frame.get("status").and_then(|v| v.as_str()) {
                    if status_str == "intervene" {
                        if let Some(text) = frame.get("last_error").and_then(|e| e.get("intervene_text")).and_then(|v| v.as_str()) {
                            yield Ok(AdapterEvent::Error(text.to_string()));
                        }
                    }
                }

                let Some(parts) = frame.get("parts").and_then(|v| v.as_array()) else { continue };
                for part in parts {
                    let Some(items) = part.get("content").and_then(|v| v.as_array()) else { continue };
                    for item in items {
                        let kind = item.get("type").and_then(|v| v.as_str()).unwrap_or("text");
                        match kind {
                            "think" => {
                                if let Some(t) = item.get("text").and_then(|v| v.as_str()) {
                                    yield Ok(AdapterEvent::ReasoningDelta(t.to_string()));
                                }
                            }
                            "code" => {
                                if let Some(code) = item.get("text").and_then(|v| v.as_str()) {
                                    let fenced = format!("```python\n{code}\n```");
                                    for ev in interceptor.push(&fenced) { yield Ok(ev); }
                                }
                            }
                            "text" => {
                                if let Some(t) = item.get("text").and_then(|v| v.as_str()) {
                                    let rewritten = fold_citations(t, &mut citation_order, &citation_urls);
                                    for ev in interceptor.push(&rewritten) { yield Ok(ev); }
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            if !citation_order.is_empty() && !interceptor.has_emitted_tool_call() {
                let footer = citations_footer(&citation_order, &citation_urls);
                for ev in interceptor.push(&footer) { yield Ok(ev); }
            }
            for ev in interceptor.finish() { yield Ok(ev); }
        });

        Ok(ChatOutcome {
            events,
            session: SessionHandle::new(),
        })
    }

    async fn delete(&self, _account: &Account, _session: &SessionHandle) -> bool {
        true
    }
}

/// Rewrites GLM's `【turnNletterK】` cite-key markers into monotonically
/// numbered `[n](url)` citations in first-seen order.
/// A key with no resolved URL yet still gets a bare `[n]` — the URL table
/// fills in as `search_result` frames arrive, which in practice precede
/// the `text` parts that reference them.
fn fold_citations(text: &str, seen: &mut Vec<String>, urls: &std::collections::HashMap<String, (String, Option<String>)>) -> String {
    if !text.contains('\u{3010}') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('\u{3010}') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + '\u{3010}'.len_utf8()..];
        if let Some(end) = tail.find('\u{3011}') {
            let key = &tail[..end];
            if key.starts_with("turn") {
                let idx = seen.iter().position(|k| k == key).unwrap_or_else(|| {
                    seen.push(key.to_string());
                    seen.len() - 1
                });
                match urls.get(key) {
                    Some((url, _)) => out.push_str(&format!(" [{}]({})", idx + 1, url)),
                    None => out.push_str(&format!(" [{}]", idx + 1)),
                }
            } else {
                out.push('\u{3010}');
                out.push_str(key);
                out.push('\u{3011}');
            }
            rest = &tail[end + '\u{3011}'.len_utf8()..];
        } else {
            out.push('\u{3010}');
            rest = tail;
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Stream-end footer listing every resolved citation in first-seen
/// numbering order: `[n]: [title](url)`.
fn citations_footer(seen: &[String], urls: &std::collections::HashMap<String, (String, Option<String>)>) -> String {
    let mut out = String::from("\n\n");
    for (i, key) in seen.iter().enumerate() {
        if let Some((url, title)) = urls.get(key) {
            let label = title.as_deref().unwrap_or(url.as_str());
            out.push_str(&format!("[{}]: [{}]({})\n", i + 1, label, url));
        }
    }
    out
}

#[cfg(test)]
mod citation_tests {
    use super::*;

    #[test]
    fn folds_cite_key_into_numbered_markdown_link_and_emits_footer() {
        let mut urls = std::collections::HashMap::new();
        urls.insert("turn0search5".to_string(), ("https://x".to_string(), Some("X".to_string())));
        let mut seen = Vec::new();

        let rewritten = fold_citations("see \u{3010}turn0search5\u{3011} for details", &mut seen, &urls);
        assert_eq!(rewritten, "see  [1](https://x) for details");

        let footer = citations_footer(&seen, &urls);
        assert_eq!(footer, "\n\n[1]: [X](https://x)\n");
    }

    #[test]
    fn repeated_cite_key_reuses_the_same_number() {
        let urls = std::collections::HashMap::new();
        let mut seen = Vec::new();
        let first = fold_citations("a \u{3010}turn1search2\u{3011}", &mut seen, &urls);
        let second = fold_citations("b \u{3010}turn1search2\u{3011}", &mut seen, &urls);
        assert_eq!(first, "a  [1]");
        assert_eq!(second, "b  [1]");
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn non_citation_bracket_text_passes_through_unchanged() {
        let urls = std::collections::HashMap::new();
        let mut seen = Vec::new();
        let text = fold_citations("plain \u{3010}not-a-turn-key\u{3011} text", &mut seen, &urls);
        assert_eq!(text, "plain \u{3010}not-a-turn-key\u{3011} text");
        assert!(seen.is_empty());
    }
}

#[cfg(test)]
mod upload_tests {
    use super::*;

    #[test]
    fn decodes_a_base64_png_data_uri() {
        let png_bytes = b"\x89PNG\r\n\x1a\nrest-of-file";
        let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);
        let uri = format!("data:image/png;base64,{encoded}");
        let (mime, bytes) = decode_data_uri(&uri).expect("valid data uri");
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, png_bytes);
    }

    #[test]
    fn remote_url_is_not_treated_as_a_data_uri() {
        assert!(decode_data_uri("https://example.com/cat.png").is_none());
    }

    #[test]
    fn sniffs_common_image_signatures() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\ngarbage"), "image/png");
        assert_eq!(sniff_mime(b"\xff\xd8\xffgarbage"), "image/jpeg");
        assert_eq!(sniff_mime(b"GIF89agarbage"), "image/gif");
        assert_eq!(sniff_mime(b"not a known format"), "application/octet-stream");
    }

    #[test]
    fn synthesizes_filename_from_mime() {
        assert_eq!(synthesized_filename("image/png"), "upload.png");
        assert_eq!(synthesized_filename("application/pdf"), "upload.pdf");
        assert_eq!(synthesized_filename("application/octet-stream"), "upload.bin");
    }
}
