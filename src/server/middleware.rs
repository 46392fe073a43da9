//! The server's middleware chain (spec §4.7): request-body gzip
//! decompression, RSA decrypt, HMAC verify, response HMAC signing,
//! response gzip compression, and the trusted-subnet CIDR gate.
//!
//! `crypto_gate` bundles decrypt + verify + response-signing into one
//! middleware since all three operate on the same buffered body bytes;
//! `gzip_codec` likewise bundles request decompression with response
//! compression. Layer order (outer → inner) still matches spec §4.7:
//! gzip, [`tower_http::trace::TraceLayer`] (wired in `router.rs`),
//! crypto, subnet gate.

use super::ServerState;
use crate::error::Error;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING};
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::{Read, Write};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(key: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, Error> {
    use flate2::read::GzDecoder;
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::BadRequest(format!("bad gzip body: {e}")))?;
    Ok(out)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, Error> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

async fn buffer_body(body: Body) -> Result<Vec<u8>, Error> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map(|b| b.to_vec())
        .map_err(|e| Error::BadRequest(format!("unreadable request body: {e}")))
}

/// Decompresses a gzip-encoded request body, and gzip-compresses the
/// response body when the client offered `Accept-Encoding: gzip`.
pub async fn gzip_codec(req: Request, next: Next) -> Result<Response, Error> {
    let accepts_gzip = req
        .headers()
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);
    let is_gzipped = req
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        == Some("gzip");

    let req = if is_gzipped {
        let (parts, body) = req.into_parts();
        let raw = buffer_body(body).await?;
        let decompressed = gunzip(&raw)?;
        Request::from_parts(parts, Body::from(decompressed))
    } else {
        req
    };

    let response = next.run(req).await;
    if !accepts_gzip {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let raw = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;
    let compressed = gzip(&raw)?;
    let mut response = Response::from_parts(parts, Body::from(compressed));
    response
        .headers_mut()
        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    Ok(response)
}

/// RSA-decrypts the request body when a server private key is
/// configured, verifies the `HashSHA256` header against the decrypted
/// body when both the header and a signing key are present, then signs
/// the outgoing response body the same way.
pub async fn crypto_gate(
    State(state): State<Arc<ServerState>>,
    req: Request,
    next: Next,
) -> Result<Response, Error> {
    let (parts, body) = req.into_parts();
    let raw = buffer_body(body).await?;

    let plaintext = match &state.private_key {
        Some(key) => crate::crypto::decrypt(&raw, key)?,
        None => raw,
    };

    if !state.signing_key.is_empty() {
        if let Some(header) = parts.headers.get("HashSHA256") {
            let expected = header.to_str().map_err(|_| Error::BadSignature)?;
            let actual = hmac_hex(&state.signing_key, &plaintext);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(Error::BadSignature);
            }
        }
    }

    let req = Request::from_parts(parts, Body::from(plaintext));
    let response = next.run(req).await;

    if state.signing_key.is_empty() {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let raw = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!(e)))?;
    let signature = hmac_hex(&state.signing_key, &raw);
    let mut response = Response::from_parts(parts, Body::from(raw));
    response.headers_mut().insert(
        "HashSHA256",
        HeaderValue::from_str(&signature).map_err(|e| Error::Internal(anyhow::anyhow!(e)))?,
    );
    Ok(response)
}

/// Rejects requests whose `X-Real-IP` doesn't lie within the configured
/// trusted subnet (spec §4.7). A no-op when no subnet is configured.
pub async fn subnet_gate(
    State(state): State<Arc<ServerState>>,
    req: Request,
    next: Next,
) -> Result<Response, Error> {
    if let Some(cidr) = &state.trusted_subnet {
        let ip = req
            .headers()
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<std::net::IpAddr>().ok())
            .ok_or_else(|| Error::Forbidden("missing or invalid X-Real-IP".into()))?;
        if !cidr.contains(ip) {
            return Err(Error::Forbidden(format!("{ip} is outside the trusted subnet")));
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_hex_is_stable_and_changes_with_body() {
        let a = hmac_hex("k", b"body-a");
        let b = hmac_hex("k", b"body-b");
        assert_ne!(a, b);
        assert_eq!(a, hmac_hex("k", b"body-a"));
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"hello gzip".to_vec();
        let compressed = gzip(&data).unwrap();
        let decompressed = gunzip(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }
}
