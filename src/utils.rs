use std::time::Duration;
use url::Url;

use crate::error::FetchError;

/// Parse and validate a target URL, accepting only http/https.
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl(format!(
            "{url}: unsupported scheme '{other}'"
        ))),
    }
}

/// Host part of a URL, covering both named hosts and IP literals.
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|d| d.to_string()))
}

/// Strip a leading `www.` so policy lookup and run state treat
/// `www.example.com` and `example.com` as the same domain.
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("www.").unwrap_or(domain)
}

/// Origin of a URL (`scheme://host/`), used as the per-request Referer.
pub fn origin_of(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), url.host_str().unwrap_or(""), port),
        None => format!("{}://{}/", url.scheme(), url.host_str().unwrap_or("")),
    }
}

/// Serialize query parameters onto a URL.
///
/// The rendering transport has no query API of its own, so parameters are
/// appended to the URL before navigation.
pub fn append_query_pairs(url: &str, params: &[(String, String)]) -> Result<String, FetchError> {
    let mut parsed = validate_url(url)?;
    if params.is_empty() {
        return Ok(parsed.into());
    }
    parsed
        .query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    Ok(parsed.into())
}

/// Random inter-request pause from the configured range, imitating human
/// pacing between successive fetches. Applied by the caller, not the engine.
pub fn polite_delay(min_s: f64, max_s: f64) -> Duration {
    use rand::Rng;
    let (lo, hi) = if min_s <= max_s { (min_s, max_s) } else { (max_s, min_s) };
    let secs = rand::thread_rng().gen_range(lo..=hi);
    Duration::from_secs_f64(secs.max(0.0))
}

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("invalid-url").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://example.com/path"),
            Some("example.com".to_string())
        );
        assert_eq!(
            extract_domain("http://127.0.0.1:8080/path"),
            Some("127.0.0.1".to_string())
        );
        assert_eq!(extract_domain("invalid-url"), None);
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("www.example.com"), "example.com");
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("www2.example.com"), "www2.example.com");
    }

    #[test]
    fn test_origin_of() {
        let url = Url::parse("https://www.example.com/listing/page?p=2").unwrap();
        assert_eq!(origin_of(&url), "https://www.example.com/");
        let url = Url::parse("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(origin_of(&url), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_append_query_pairs() {
        let params = vec![
            ("pag".to_string(), "2".to_string()),
            ("sort".to_string(), "price asc".to_string()),
        ];
        let out = append_query_pairs("https://example.com/list", &params).unwrap();
        assert_eq!(out, "https://example.com/list?pag=2&sort=price+asc");

        let out = append_query_pairs("https://example.com/list?x=1", &params).unwrap();
        assert!(out.starts_with("https://example.com/list?x=1&pag=2"));

        let out = append_query_pairs("https://example.com/list", &[]).unwrap();
        assert_eq!(out, "https://example.com/list");
    }

    #[test]
    fn test_polite_delay_in_range() {
        for _ in 0..50 {
            let d = polite_delay(1.5, 3.5);
            assert!(d >= Duration::from_secs_f64(1.5));
            assert!(d <= Duration::from_secs_f64(3.5));
        }
        assert_eq!(polite_delay(0.0, 0.0), Duration::from_secs(0));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.html"), "test.html");
        assert_eq!(
            sanitize_filename("example.com/anunt/laptop?p=1"),
            "example.com_anunt_laptop_p=1"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
    }
}
