//! Conditional request evaluation and `Range` negotiation.
//!
//! Dates carried by HTTP headers have one-second resolution while
//! modification times are kept in milliseconds, so every date comparison
//! allows one second of fuzz.
use std::time::SystemTime;

use http::header::{HeaderMap, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE, RANGE};

use crate::util::{httpdate_to_systemtime, millis, DavMethod};

const DATE_FUZZ_MS: i128 = 1000;

/// One validated byte range, `start <= end < total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

/// Outcome of [`negotiate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Negotiation {
    /// Serve the listed ranges. Empty means the full entity.
    Serve(Vec<ByteRange>),
    NotModified,
    PreconditionFailed,
    RangeNotSatisfiable,
}

/// What we know about the selected representation.
#[derive(Debug, Clone)]
pub(crate) struct Validators<'a> {
    pub etag: &'a str,
    pub last_modified: SystemTime,
    pub length: u64,
    pub collection: bool,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &http::header::HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_millis(headers: &HeaderMap, name: &http::header::HeaderName) -> Option<i128> {
    headers.get(name).and_then(httpdate_to_systemtime).map(millis)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

// If-Match: a `*` anywhere matches, otherwise one of the listed tags must.
fn if_match_ok(value: &str, etag: &str) -> bool {
    value.contains('*') || value.split(',').any(|t| t.trim() == etag)
}

// If-None-Match uses the weak comparison.
fn none_match_hits(value: &str, etag: &str) -> bool {
    let value = value.trim();
    value == "*" || value.split(',').any(|t| strip_weak(t.trim()) == strip_weak(etag))
}

/// Evaluate `If-Match`, `If-Modified-Since`, `If-None-Match` and
/// `If-Unmodified-Since`, in that order.
///
/// Returns `None` when the request may proceed.
pub(crate) fn check_preconditions(method: DavMethod, headers: &HeaderMap, v: &Validators) -> Option<Negotiation> {
    let lm = millis(v.last_modified);
    let is_read = matches!(method, DavMethod::Get | DavMethod::Head);

    if !v.collection {
        if let Some(value) = header_str(headers, &IF_MATCH) {
            if !if_match_ok(value, v.etag) {
                debug!("If-Match {value} does not match {}", v.etag);
                return Some(Negotiation::PreconditionFailed);
            }
        }
    }

    if is_read && !headers.contains_key(IF_NONE_MATCH) {
        if let Some(since) = header_millis(headers, &IF_MODIFIED_SINCE) {
            if lm < since + DATE_FUZZ_MS {
                return Some(Negotiation::NotModified);
            }
        }
    }

    if v.collection {
        return None;
    }

    if let Some(value) = header_str(headers, &IF_NONE_MATCH) {
        if none_match_hits(value, v.etag) {
            return Some(if is_read {
                Negotiation::NotModified
            } else {
                Negotiation::PreconditionFailed
            });
        }
    }

    if let Some(since) = header_millis(headers, &IF_UNMODIFIED_SINCE) {
        if lm >= since + DATE_FUZZ_MS {
            return Some(Negotiation::PreconditionFailed);
        }
    }

    None
}

/// Conditional headers against a resource that does not exist.
///
/// `If-Match` can never match an absent resource.
pub(crate) fn check_absent(headers: &HeaderMap) -> Option<Negotiation> {
    if headers.contains_key(IF_MATCH) {
        Some(Negotiation::PreconditionFailed)
    } else {
        None
    }
}

// Does If-Range allow us to honour the Range header.
fn if_range_ok(headers: &HeaderMap, v: &Validators) -> bool {
    let value = match headers.get(IF_RANGE) {
        Some(value) => value,
        None => return true,
    };
    if let Some(since) = httpdate_to_systemtime(value) {
        return millis(v.last_modified) <= millis(since) + DATE_FUZZ_MS;
    }
    match value.to_str() {
        Ok(tag) => tag.trim() == v.etag,
        Err(_) => false,
    }
}

fn parse_range_spec(spec: &str, total: u64) -> Option<ByteRange> {
    let total_i = total as i128;
    let (start, end) = match spec.split_once('-')? {
        ("", suffix) => {
            let n: i128 = suffix.trim().parse::<u64>().ok()?.into();
            (total_i - n, total_i - 1)
        }
        (start, "") => (start.trim().parse::<u64>().ok()?.into(), total_i - 1),
        (start, end) => (
            start.trim().parse::<u64>().ok()?.into(),
            end.trim().parse::<u64>().ok()?.into(),
        ),
    };
    // the end is clamped to the entity, everything else must be in bounds.
    let end = std::cmp::min(end, total_i - 1);
    if start < 0 || end < 0 || start > end || total == 0 {
        return None;
    }
    Some(ByteRange {
        start: start as u64,
        end: end as u64,
        total,
    })
}

/// Parse a `Range` header value. Any malformed or unsatisfiable member
/// rejects the whole header.
pub(crate) fn parse_range(value: &str, total: u64) -> Option<Vec<ByteRange>> {
    let specs = value.trim().strip_prefix("bytes=")?;
    let ranges = specs
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_range_spec(s, total))
        .collect::<Option<Vec<_>>>()?;
    if ranges.is_empty() {
        return None;
    }
    Some(ranges)
}

/// Decide how to answer a read of a resource.
pub(crate) fn negotiate(method: DavMethod, headers: &HeaderMap, v: &Validators) -> Negotiation {
    if let Some(n) = check_preconditions(method, headers, v) {
        return n;
    }
    if v.collection || v.length == 0 || !matches!(method, DavMethod::Get | DavMethod::Head) {
        return Negotiation::Serve(Vec::new());
    }
    let range = match headers.get(RANGE) {
        Some(range) => range,
        None => return Negotiation::Serve(Vec::new()),
    };
    if !if_range_ok(headers, v) {
        debug!("If-Range mismatch, serving full content");
        return Negotiation::Serve(Vec::new());
    }
    match range.to_str().ok().and_then(|r| parse_range(r, v.length)) {
        Some(ranges) => Negotiation::Serve(ranges),
        None => {
            debug!("unsatisfiable range {range:?} for length {}", v.length);
            Negotiation::RangeNotSatisfiable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    use crate::util::systemtime_to_httpdate;

    const ETAG: &str = "\"10-1000000000\"";

    fn validators() -> Validators<'static> {
        Validators {
            etag: ETAG,
            last_modified: UNIX_EPOCH + Duration::from_millis(1_000_000_000),
            length: 10,
            collection: false,
        }
    }

    fn headers(list: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in list {
            h.insert(*k, v.parse().unwrap());
        }
        h
    }

    fn range(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end, total: 10 }
    }

    #[test]
    fn test_no_headers() {
        assert_eq!(
            negotiate(DavMethod::Get, &HeaderMap::new(), &validators()),
            Negotiation::Serve(vec![])
        );
    }

    #[test]
    fn test_single_and_multi_range() {
        let h = headers(&[("range", "bytes=2-5")]);
        let n = negotiate(DavMethod::Get, &h, &validators());
        assert_eq!(n, Negotiation::Serve(vec![range(2, 5)]));
        if let Negotiation::Serve(r) = n {
            assert_eq!(r[0].len(), 4);
            assert_eq!(r[0].content_range(), "bytes 2-5/10");
        }

        let h = headers(&[("range", "bytes=-3, 0-0,,7-")]);
        assert_eq!(
            negotiate(DavMethod::Get, &h, &validators()),
            Negotiation::Serve(vec![range(7, 9), range(0, 0), range(7, 9)])
        );

        let h = headers(&[("range", "bytes=5-100")]);
        assert_eq!(
            negotiate(DavMethod::Get, &h, &validators()),
            Negotiation::Serve(vec![range(5, 9)])
        );
    }

    #[test]
    fn test_unsatisfiable() {
        for r in ["bytes=5-2", "bytes=10-", "bytes=-11", "bytes=a-b", "items=0-1", "bytes=1-2,x", "bytes=", "bytes=-0"] {
            let h = headers(&[("range", r)]);
            assert_eq!(
                negotiate(DavMethod::Get, &h, &validators()),
                Negotiation::RangeNotSatisfiable,
                "{r}"
            );
        }
    }

    #[test]
    fn test_empty_entity_ignores_range() {
        let mut v = validators();
        v.length = 0;
        let h = headers(&[("range", "bytes=0-5")]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));
    }

    #[test]
    fn test_if_none_match_star() {
        let h = headers(&[("if-none-match", "*")]);
        assert_eq!(negotiate(DavMethod::Get, &h, &validators()), Negotiation::NotModified);
        assert_eq!(negotiate(DavMethod::Head, &h, &validators()), Negotiation::NotModified);
        assert_eq!(
            check_preconditions(DavMethod::Put, &h, &validators()),
            Some(Negotiation::PreconditionFailed)
        );
        let h = headers(&[("if-none-match", "W/\"10-1000000000\"")]);
        assert_eq!(negotiate(DavMethod::Get, &h, &validators()), Negotiation::NotModified);
    }

    #[test]
    fn test_if_match() {
        let h = headers(&[("if-match", "\"other\", \"10-1000000000\"")]);
        assert_eq!(check_preconditions(DavMethod::Put, &h, &validators()), None);
        let h = headers(&[("if-match", "\"other\"")]);
        assert_eq!(
            negotiate(DavMethod::Get, &h, &validators()),
            Negotiation::PreconditionFailed
        );
        let mut v = validators();
        v.collection = true;
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));
        assert_eq!(check_absent(&h), Some(Negotiation::PreconditionFailed));
        assert_eq!(check_absent(&HeaderMap::new()), None);
    }

    #[test]
    fn test_modified_since() {
        let v = validators();
        let same = systemtime_to_httpdate(v.last_modified);
        let h = headers(&[("if-modified-since", same.as_str())]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::NotModified);
        // only for reads.
        assert_eq!(check_preconditions(DavMethod::Delete, &h, &v), None);
        // If-None-Match takes over.
        let h = headers(&[("if-modified-since", same.as_str()), ("if-none-match", "\"x\"")]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));

        let older = systemtime_to_httpdate(v.last_modified - Duration::from_secs(5));
        let h = headers(&[("if-modified-since", older.as_str())]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));
        let h = headers(&[("if-modified-since", "not a date")]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));
    }

    #[test]
    fn test_unmodified_since() {
        let v = validators();
        let older = systemtime_to_httpdate(v.last_modified - Duration::from_secs(5));
        let h = headers(&[("if-unmodified-since", older.as_str())]);
        assert_eq!(
            check_preconditions(DavMethod::Put, &h, &v),
            Some(Negotiation::PreconditionFailed)
        );
        let same = systemtime_to_httpdate(v.last_modified);
        let h = headers(&[("if-unmodified-since", same.as_str())]);
        assert_eq!(check_preconditions(DavMethod::Put, &h, &v), None);
    }

    #[test]
    fn test_if_range() {
        let v = validators();
        let h = headers(&[("range", "bytes=0-1"), ("if-range", ETAG)]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![range(0, 1)]));
        let h = headers(&[("range", "bytes=0-1"), ("if-range", "\"stale\"")]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));
        let older = systemtime_to_httpdate(v.last_modified - Duration::from_secs(5));
        let h = headers(&[("range", "bytes=0-1"), ("if-range", older.as_str())]);
        assert_eq!(negotiate(DavMethod::Get, &h, &v), Negotiation::Serve(vec![]));
    }
}
