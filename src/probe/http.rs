//! HTTP probe implementation.
//!
//! The check looks at the status line of the response and, when a content
//! pattern is configured, searches the headers and body for it.

use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use reqwest::Url;

use super::ProbeError;

/// Run an HTTP probe against the given address.
pub async fn run_http_probe(
    address: &str,
    port: u16,
    pattern: Option<&str>,
    timeout: Duration,
) -> Result<(), ProbeError> {
    let url = build_url(address, port)?;
    let pattern = pattern.map(compile_pattern).transpose()?;

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .user_agent(concat!("serverwatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::NoResponse(error_chain(&e))
        }
    })?;

    let mut text = render_head(&response);

    // Only pull the body when there is something to search for
    if pattern.is_some() {
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else {
                ProbeError::Network(error_chain(&e))
            }
        })?;
        text.push_str("\r\n");
        text.push_str(&String::from_utf8_lossy(&body));
    }

    check_response(&text, pattern.as_ref())
}

/// Build the request URL: default scheme `http`, target port wins when set,
/// path and query are kept. IPv6 hosts must be written in brackets.
pub fn build_url(address: &str, port: u16) -> Result<Url, ProbeError> {
    let address = address.trim();
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| ProbeError::Config(format!("invalid URL {}: {}", address, e)))?;

    if port != 0 {
        url.set_port(Some(port))
            .map_err(|_| ProbeError::Config(format!("cannot set port {} on {}", port, address)))?;
    }
    url.set_fragment(None);

    Ok(url)
}

fn compile_pattern(pattern: &str) -> Result<Regex, ProbeError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| ProbeError::Config(format!("invalid content pattern: {}", e)))
}

/// Status line followed by the response headers, one per line.
fn render_head(response: &reqwest::Response) -> String {
    let status = response.status();
    let mut text = format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers() {
        let _ = write!(text, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    text
}

fn status_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Z]{2,5}/\d\.\d\s(?P<code>\d{3})\s(?P<reason>.*)").expect("static regex")
    })
}

/// Decide the outcome from the raw response text.
///
/// A status code whose leading digit is 4 or higher fails the check. A
/// configured pattern that does not match fails it too, even after a good
/// status line, and its error replaces any earlier one.
pub fn check_response(raw: &str, pattern: Option<&Regex>) -> Result<(), ProbeError> {
    let first_line = raw.lines().next().unwrap_or("");

    let mut result = match status_line_regex().captures(first_line) {
        None => Err(ProbeError::NoResponse("no status line".to_string())),
        Some(caps) => {
            let code = &caps["code"];
            let reason = caps["reason"].trim();
            if code.as_bytes()[0] >= b'4' {
                Err(ProbeError::HttpStatus(format!("{} {}", code, reason).trim_end().to_string()))
            } else {
                Ok(())
            }
        }
    };

    if let Some(re) = pattern {
        if !re.is_match(raw) {
            result = Err(ProbeError::PatternNotFound);
        }
    }

    result
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = write!(text, ": {}", cause);
        source = cause.source();
    }
    text
}
