//! Plain HTTP transport
//!
//! Single-attempt fetches with browser-like headers and response
//! normalization. Retry and escalation decisions belong to the strategy
//! engine; this module only reports what happened on the wire, as a
//! [`RawResponse`] or a [`FetchError`] variant the engine can classify via
//! `is_retryable`.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER};
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::FetchResult;
use crate::error::FetchError;
use crate::policy::FetchPolicy;
use crate::utils::{origin_of, validate_url};

/// One plain-HTTP exchange, body already normalized to text.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub elapsed_ms: u64,
}

impl RawResponse {
    pub fn into_result(self) -> FetchResult {
        FetchResult {
            url: self.url,
            status_code: self.status,
            body_text: self.body,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// HTTP client presenting itself as an ordinary desktop Chrome session.
///
/// Keeps a cookie store across requests so repeated hits on the same domain
/// look like one browsing session, matching what the rendering transport's
/// per-domain contexts do on their side.
pub struct HttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .default_headers(browser_headers(config))
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            default_timeout: config.timeout,
        })
    }

    /// Issue a single GET attempt under the policy's timeout.
    ///
    /// The `Referer` is set to the URL's own origin, simulating organic
    /// entry to the site rather than carrying a stale navigation history.
    pub async fn fetch_once(
        &self,
        url: &str,
        policy: &FetchPolicy,
        params: Option<&[(String, String)]>,
    ) -> Result<RawResponse, FetchError> {
        let parsed = validate_url(url)?;
        let referer = origin_of(&parsed);
        let timeout = policy.timeout(self.default_timeout);
        let start = Instant::now();

        let mut request = self
            .client
            .get(parsed)
            .timeout(timeout)
            .header(REFERER, referer);
        if let Some(params) = params {
            request = request.query(params);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let charset = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let mut body = decode_body(&bytes, charset.as_deref());
        if let Some(repaired) = repair_gzip(&bytes, &body) {
            warn!(url, "response body was gzip without a content-encoding header, repaired");
            body = repaired;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(url, status, elapsed_ms, bytes = body.len(), "http fetch attempt done");

        Ok(RawResponse {
            url: url.to_string(),
            status,
            body,
            elapsed_ms,
        })
    }
}

/// Static header set shared by every request.
fn browser_headers(config: &EngineConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    if let Ok(value) = HeaderValue::from_str(&config.accept_language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("upgrade-insecure-requests", HeaderValue::from_static("1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static("\"Chromium\";v=\"121\", \"Not A(Brand\";v=\"99\""),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("\"Windows\""));
    headers
}

/// Pull a `charset=` parameter out of a Content-Type header value.
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"').to_string())
}

/// Is the declared charset the single-byte Western default that servers
/// emit without meaning it?
fn is_default_western(charset: &str) -> bool {
    charset.eq_ignore_ascii_case("iso-8859-1") || charset.eq_ignore_ascii_case("latin1")
}

/// Decode a response body to text.
///
/// A missing or default-Western declared charset is usually wrong for
/// non-ASCII content, so in that case the apparent encoding is detected
/// from the bytes instead of trusting the header.
pub(crate) fn decode_body(bytes: &[u8], declared: Option<&str>) -> String {
    match declared {
        Some(label) if !is_default_western(label) => {
            match encoding_rs::Encoding::for_label(label.as_bytes()) {
                Some(encoding) => {
                    let (text, _, _) = encoding.decode(bytes);
                    text.into_owned()
                }
                None => decode_apparent(bytes),
            }
        }
        _ => decode_apparent(bytes),
    }
}

fn decode_apparent(bytes: &[u8]) -> String {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// Repair for misconfigured compression: a body that does not look like
/// HTML but starts with the gzip magic number gets gunzipped by hand.
pub(crate) fn repair_gzip(raw: &[u8], text: &str) -> Option<String> {
    const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

    if looks_like_html(text) || !raw.starts_with(&GZIP_MAGIC) {
        return None;
    }

    let mut decoder = flate2::read::GzDecoder::new(raw);
    let mut decompressed = Vec::new();
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => Some(decode_body(&decompressed, None)),
        Err(_) => None,
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(256).collect::<String>().to_lowercase();
    head.starts_with('<') || head.contains("<html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_charset_from_content_type() {
        assert_eq!(
            charset_from_content_type("text/html; charset=utf-8"),
            Some("utf-8".to_string())
        );
        assert_eq!(
            charset_from_content_type("text/html; charset=\"windows-1250\""),
            Some("windows-1250".to_string())
        );
        assert_eq!(charset_from_content_type("text/html"), None);
    }

    #[test]
    fn test_decode_trusts_declared_charset() {
        // "ofertă" in windows-1250: ă is 0xE3
        let bytes = b"ofert\xe3";
        assert_eq!(decode_body(bytes, Some("windows-1250")), "ofertă");
    }

    #[test]
    fn test_decode_detects_when_declared_is_western_default() {
        // Romanian diacritics encoded as UTF-8, served with the bogus
        // latin-1 default: detection recovers the real encoding.
        let text = "Laptopuri și anunțuri în București";
        let decoded = decode_body(text.as_bytes(), Some("ISO-8859-1"));
        assert_eq!(decoded, text);
    }

    #[test]
    fn test_decode_without_declared_charset() {
        let text = "diacritice: șțăîâ";
        assert_eq!(decode_body(text.as_bytes(), None), text);
    }

    #[test]
    fn test_repair_gzip_round_trip() {
        let html = "<html><body>pagină reală</body></html>";
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(html.as_bytes()).unwrap();
        let gzipped = encoder.finish().unwrap();

        let garbled = decode_body(&gzipped, None);
        let repaired = repair_gzip(&gzipped, &garbled).expect("repairable");
        assert_eq!(repaired, html);
    }

    #[test]
    fn test_repair_gzip_leaves_html_alone() {
        let html = "<html><body>ok</body></html>";
        assert!(repair_gzip(html.as_bytes(), html).is_none());
    }

    #[test]
    fn test_repair_gzip_ignores_non_gzip_garbage() {
        let garbage = [0x00u8, 0x01, 0x02];
        assert!(repair_gzip(&garbage, "\u{0}\u{1}\u{2}").is_none());
    }
}
