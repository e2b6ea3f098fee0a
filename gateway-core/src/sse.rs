//! Byte-stream framing helpers shared by every vendor's response parser:
//! split an arbitrary chunked byte stream into SSE `data: ...` lines, or
//! into newline-delimited JSON records (MiniMax's HTTP/2 native-stream path
//! accepts either).

use bytes::Bytes;
use futures::Stream;
use futures_util::StreamExt;

/// Incrementally splits a byte stream into complete lines (without the
/// trailing `\n`), buffering any partial trailing line across chunks. Used
/// as the base framer before vendor-specific SSE/event parsing.
///
/// A multi-byte UTF-8 sequence split across two network chunks is held back
/// (not lossily decoded) until the rest of it arrives — vendors streaming
/// CJK text routinely split a response mid-character at a chunk boundary.
pub fn lines<S, E>(mut byte_stream: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    async_stream::stream! {
        let mut byte_buf: Vec<u8> = Vec::new();
        let mut text_buf = String::new();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            byte_buf.extend_from_slice(&chunk);
            match std::str::from_utf8(&byte_buf) {
                Ok(s) => {
                    text_buf.push_str(s);
                    byte_buf.clear();
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // `byte_buf[..valid_up_to]` is valid UTF-8 by construction;
                    // the remainder is a partial trailing sequence held for
                    // the next chunk.
                    text_buf.push_str(std::str::from_utf8(&byte_buf[..valid_up_to]).unwrap());
                    byte_buf.drain(..valid_up_to);
                }
            }
            loop {
                let Some(idx) = text_buf.find('\n') else { break };
                let line = text_buf[..idx].trim_end_matches('\r').to_string();
                text_buf.drain(..=idx);
                yield Ok(line);
            }
        }
        if !byte_buf.is_empty() {
            // Upstream closed mid-codepoint (truncated/malformed stream);
            // lossily decode the remainder rather than silently dropping it.
            text_buf.push_str(&String::from_utf8_lossy(&byte_buf));
        }
        if !text_buf.is_empty() {
            yield Ok(text_buf);
        }
    }
}

/// Extracts the payload of an SSE `data: ...` line, or `None` for blank
/// lines, comments (`:`), and other event-framing lines (`event:`, `id:`)
/// that a caller handles separately.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn lines_reassembles_across_chunk_boundaries() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\nda")),
            Ok(Bytes::from_static(b"ta: {\"b\":2}\n")),
        ];
        let s = lines(stream::iter(chunks));
        let out: Vec<String> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(out, vec!["data: {\"a\":1}", "data: {\"b\":2}"]);
    }

    #[tokio::test]
    async fn lines_holds_back_a_multi_byte_char_split_across_chunks() {
        let full = "data: 你好\n".as_bytes().to_vec();
        // "你" is e4 bd a0; split inside it so neither chunk is valid UTF-8 alone.
        let split_at = full.iter().position(|&b| b == 0xe4).unwrap() + 2;
        let (a, b) = full.split_at(split_at);
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::copy_from_slice(a)), Ok(Bytes::copy_from_slice(b))];
        let s = lines(stream::iter(chunks));
        let out: Vec<String> = s.map(|r| r.unwrap()).collect().await;
        assert_eq!(out, vec!["data: 你好".to_string()]);
    }

    #[test]
    fn data_payload_strips_prefix() {
        assert_eq!(data_payload("data: hi"), Some("hi"));
        assert_eq!(data_payload("data:hi"), Some("hi"));
        assert_eq!(data_payload("event: foo"), None);
    }
}
