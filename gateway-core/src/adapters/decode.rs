//! Variable `Content-Encoding` demux for Qwen domestic: the
//! vendor picks gzip/deflate/br/zstd per response, so the client that talks
//! to it must disable automatic decompression and pick the decoder itself.
//! zstd has no incremental async decoder in this stack, so it is buffered in
//! full before decompression — every other encoding stays fully streaming.

use crate::error::AdapterError;
use async_compression::tokio::bufread::{BrotliDecoder, DeflateDecoder, GzipDecoder};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use tokio_util::io::{ReaderStream, StreamReader};

/// Builds a client with HTTP-level auto-decompression turned off, so
/// `Content-Encoding` always reaches us untouched.
pub fn raw_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_gzip()
        .no_deflate()
        .no_brotli()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .expect("static reqwest client config is always valid")
}

/// Reads `resp`'s `Content-Encoding` and returns a byte stream of the
/// decompressed body.
pub async fn decode_response(resp: reqwest::Response) -> Result<BoxStream<'static, Result<Bytes, AdapterError>>, AdapterError> {
    let encoding = resp
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let raw = resp
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));

    match encoding.as_str() {
        "gzip" => {
            let reader = StreamReader::new(raw);
            let decoder = GzipDecoder::new(reader);
            Ok(ReaderStream::new(decoder)
                .map_err(|e| AdapterError::transport(e.to_string()))
                .boxed())
        }
        "deflate" => {
            let reader = StreamReader::new(raw);
            let decoder = DeflateDecoder::new(reader);
            Ok(ReaderStream::new(decoder)
                .map_err(|e| AdapterError::transport(e.to_string()))
                .boxed())
        }
        "br" => {
            let reader = StreamReader::new(raw);
            let decoder = BrotliDecoder::new(reader);
            Ok(ReaderStream::new(decoder)
                .map_err(|e| AdapterError::transport(e.to_string()))
                .boxed())
        }
        "zstd" => {
            let mut reader = StreamReader::new(raw);
            let mut compressed = Vec::new();
            reader
                .read_to_end(&mut compressed)
                .await
                .map_err(|e| AdapterError::transport(e.to_string()))?;
            let decompressed = zstd::stream::decode_all(&compressed[..])
                .map_err(|e| AdapterError::protocol_drift(format!("zstd decode: {e}")))?;
            Ok(futures::stream::once(async move { Ok(Bytes::from(decompressed)) }).boxed())
        }
        _ => Ok(raw.map_err(|e| AdapterError::transport(e.to_string())).boxed()),
    }
}
