// Webdav-specific request and response headers.
use std::time::Duration;

use headers::Header;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use regex::Regex;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref RE_LIST: Regex = Regex::new(r"\(([^)]*)\)").unwrap();
    static ref RE_TOKEN: Regex = Regex::new(r"<([^>]+)>").unwrap();
}

/// Lock timeout if the client doesn't ask for one (seconds).
pub(crate) const DEFAULT_TIMEOUT: u64 = 3600;
/// Longest lock timeout we hand out (seconds).
pub(crate) const MAX_TIMEOUT: u64 = 604800;

fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    values
        .next()
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .ok_or_else(headers::Error::invalid)
}

fn encode_str<E: Extend<HeaderValue>>(s: &str, values: &mut E) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.to_ascii_lowercase().as_str() {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            "infinity" => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        encode_str(value, values);
    }
}

/// `Overwrite: T|F`. Anything but `T` means false.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(Overwrite(one(values)?.eq_ignore_ascii_case("t")))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(if self.0 { "T" } else { "F" }, values);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        Ok(Destination(one(values)?.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&self.0, values);
    }
}

/// `Lock-Token: <token>`. The angle brackets are not part of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        let s = s.strip_prefix('<').unwrap_or(s);
        let s = s.strip_suffix('>').unwrap_or(s);
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(LockToken(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(&format!("<{}>", self.0), values);
    }
}

/// Lock timeout requested by the `Timeout` header.
///
/// Only the first of a list is used. `Second-N` and a bare number are
/// seconds; `infinity` and anything unparseable get the maximum, zero
/// gets the default, and nothing is allowed above the maximum.
pub(crate) fn lock_timeout(headers: &HeaderMap) -> Duration {
    let value = match headers.get(&*TIMEOUT).and_then(|v| v.to_str().ok()) {
        Some(v) => v,
        None => return Duration::from_secs(DEFAULT_TIMEOUT),
    };
    let first = value.split(',').next().unwrap_or("").trim();
    let secs = if let Some(n) = first.strip_prefix("Second-") {
        n.trim().parse::<u64>().unwrap_or(MAX_TIMEOUT)
    } else if first.eq_ignore_ascii_case("infinity") || first.eq_ignore_ascii_case("infinite") {
        MAX_TIMEOUT
    } else {
        first.parse::<u64>().unwrap_or(MAX_TIMEOUT)
    };
    let secs = match secs {
        0 => DEFAULT_TIMEOUT,
        s => std::cmp::min(s, MAX_TIMEOUT),
    };
    Duration::from_secs(secs)
}

/// `Timeout` response value.
pub(crate) fn timeout_value(timeout: Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("Second-{}", t.as_secs()),
        None => "Infinite".to_string(),
    }
}

/// State tokens from the `If` header, in order of appearance.
pub(crate) fn if_tokens(headers: &HeaderMap) -> Vec<String> {
    let mut tokens = Vec::new();
    for value in headers.get_all(&*IF).iter() {
        let value = match value.to_str() {
            Ok(v) => v,
            Err(_) => continue,
        };
        for list in RE_LIST.captures_iter(value) {
            for tok in RE_TOKEN.captures_iter(&list[1]) {
                tokens.push(tok[1].to_string());
            }
        }
    }
    tokens
}

/// Tokens submitted through `If` and `Lock-Token`.
pub(crate) fn submitted_tokens(headers: &HeaderMap) -> Vec<String> {
    let mut tokens = if_tokens(headers);
    if let Some(LockToken(t)) = headers_get::<LockToken>(headers) {
        tokens.push(t);
    }
    tokens
}

pub(crate) fn headers_get<H: Header>(headers: &HeaderMap) -> Option<H> {
    use headers::HeaderMapExt;
    headers.typed_get::<H>()
}
