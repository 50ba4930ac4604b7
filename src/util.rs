use std::io::{Cursor, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use headers::Header;
use http::method::InvalidMethod;
use time::format_description::well_known::Rfc3339;
use time::macros::offset;

use crate::errors::DavError;
use crate::DavResult;

/// HTTP and Webdav methods understood by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavMethod {
    Head,
    Get,
    Put,
    Post,
    Delete,
    Options,
    PropFind,
    PropPatch,
    MkCol,
    Copy,
    Move,
    Lock,
    Unlock,
}

bitflags! {
    /// A set of allowed [`DavMethod`]s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DavMethodSet: u32 {
        const HEAD = 0x0001;
        const GET = 0x0002;
        const PUT = 0x0004;
        const POST = 0x0008;
        const OPTIONS = 0x0010;
        const PROPFIND = 0x0020;
        const PROPPATCH = 0x0040;
        const MKCOL = 0x0080;
        const COPY = 0x0100;
        const MOVE = 0x0200;
        const DELETE = 0x0400;
        const LOCK = 0x0800;
        const UNLOCK = 0x1000;

        const HTTP_RO = Self::HEAD.bits() | Self::GET.bits() | Self::OPTIONS.bits();
        const HTTP_RW = Self::HTTP_RO.bits() | Self::PUT.bits() | Self::POST.bits();
        const WEBDAV_RO = Self::HTTP_RO.bits() | Self::PROPFIND.bits();
    }
}

impl DavMethodSet {
    pub const WEBDAV_RW: Self = Self::all();

    /// Is this method part of the set.
    pub fn has(&self, m: DavMethod) -> bool {
        self.contains(DavMethodSet::from(m))
    }
}

impl From<DavMethod> for DavMethodSet {
    fn from(m: DavMethod) -> DavMethodSet {
        match m {
            DavMethod::Head => DavMethodSet::HEAD,
            DavMethod::Get => DavMethodSet::GET,
            DavMethod::Put => DavMethodSet::PUT,
            DavMethod::Post => DavMethodSet::POST,
            DavMethod::Delete => DavMethodSet::DELETE,
            DavMethod::Options => DavMethodSet::OPTIONS,
            DavMethod::PropFind => DavMethodSet::PROPFIND,
            DavMethod::PropPatch => DavMethodSet::PROPPATCH,
            DavMethod::MkCol => DavMethodSet::MKCOL,
            DavMethod::Copy => DavMethodSet::COPY,
            DavMethod::Move => DavMethodSet::MOVE,
            DavMethod::Lock => DavMethodSet::LOCK,
            DavMethod::Unlock => DavMethodSet::UNLOCK,
        }
    }
}

impl DavMethod {
    /// Method name as it appears on the wire (and in `Allow:`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DavMethod::Head => "HEAD",
            DavMethod::Get => "GET",
            DavMethod::Put => "PUT",
            DavMethod::Post => "POST",
            DavMethod::Delete => "DELETE",
            DavMethod::Options => "OPTIONS",
            DavMethod::PropFind => "PROPFIND",
            DavMethod::PropPatch => "PROPPATCH",
            DavMethod::MkCol => "MKCOL",
            DavMethod::Copy => "COPY",
            DavMethod::Move => "MOVE",
            DavMethod::Lock => "LOCK",
            DavMethod::Unlock => "UNLOCK",
        }
    }

    /// Methods that change the namespace or its content.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            DavMethod::Put
                | DavMethod::Post
                | DavMethod::Delete
                | DavMethod::PropPatch
                | DavMethod::MkCol
                | DavMethod::Copy
                | DavMethod::Move
                | DavMethod::Lock
                | DavMethod::Unlock
        )
    }
}

// translate method into our own enum that has webdav methods as well.
pub(crate) fn dav_method(m: &http::Method) -> DavResult<DavMethod> {
    let m = match *m {
        http::Method::HEAD => DavMethod::Head,
        http::Method::GET => DavMethod::Get,
        http::Method::PUT => DavMethod::Put,
        http::Method::POST => DavMethod::Post,
        http::Method::DELETE => DavMethod::Delete,
        http::Method::OPTIONS => DavMethod::Options,
        _ => match m.as_str() {
            "PROPFIND" => DavMethod::PropFind,
            "PROPPATCH" => DavMethod::PropPatch,
            "MKCOL" => DavMethod::MkCol,
            "COPY" => DavMethod::Copy,
            "MOVE" => DavMethod::Move,
            "LOCK" => DavMethod::Lock,
            "UNLOCK" => DavMethod::Unlock,
            _ => {
                return Err(DavError::UnknownDavMethod);
            }
        },
    };
    Ok(m)
}

// for external use.
impl std::convert::TryFrom<&http::Method> for DavMethod {
    type Error = InvalidMethod;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        dav_method(value).map_err(|_| {
            // A trick to get at the value of http::method::InvalidMethod.
            http::method::Method::from_bytes(b"").unwrap_err()
        })
    }
}

pub(crate) fn systemtime_to_offsetdatetime(t: SystemTime) -> time::OffsetDateTime {
    let secs = match t.duration_since(UNIX_EPOCH) {
        Ok(t) => t.as_secs() as i64,
        Err(_) => 0,
    };
    match time::OffsetDateTime::from_unix_timestamp(secs) {
        Ok(tm) => tm.to_offset(offset!(UTC)),
        Err(_) => time::OffsetDateTime::UNIX_EPOCH.to_offset(offset!(UTC)),
    }
}

/// RFC 1123 date, as used in `Last-Modified` and `getlastmodified`.
pub(crate) fn systemtime_to_httpdate(t: SystemTime) -> String {
    let d = headers::Date::from(t);
    let mut v = Vec::new();
    d.encode(&mut v);
    v.first()
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
        .unwrap_or_default()
}

/// `creationdate` format: 1996-12-19T16:39:57Z
pub(crate) fn systemtime_to_rfc3339(t: SystemTime) -> String {
    systemtime_to_offsetdatetime(t)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Parse any of the three HTTP date formats.
pub(crate) fn httpdate_to_systemtime(v: &http::HeaderValue) -> Option<SystemTime> {
    headers::Date::decode(&mut std::iter::once(v))
        .ok()
        .map(SystemTime::from)
}

/// Milliseconds since the epoch. Validators and the conditional
/// checks all work at this resolution.
pub(crate) fn millis(t: SystemTime) -> i128 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i128,
        Err(e) => -(e.duration().as_millis() as i128),
    }
}

// A buffer that implements "Write".
#[derive(Clone)]
pub(crate) struct MemBuffer(Cursor<Vec<u8>>);

impl MemBuffer {
    pub fn new() -> MemBuffer {
        MemBuffer(Cursor::new(Vec::new()))
    }

    pub fn take(&mut self) -> Bytes {
        let buf = std::mem::take(self.0.get_mut());
        self.0.set_position(0);
        Bytes::from(buf)
    }
}

impl Write for MemBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_rfc3339() {
        assert!(systemtime_to_rfc3339(UNIX_EPOCH) == "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_httpdate_roundtrip() {
        let t = UNIX_EPOCH + Duration::from_secs(784111777);
        let s = systemtime_to_httpdate(t);
        assert_eq!(s, "Sun, 06 Nov 1994 08:49:37 GMT");
        let v = http::HeaderValue::from_str(&s).unwrap();
        assert_eq!(httpdate_to_systemtime(&v), Some(t));
    }

    #[test]
    fn test_bad_httpdate() {
        let v = http::HeaderValue::from_static("\"12-3400\"");
        assert_eq!(httpdate_to_systemtime(&v), None);
    }

    #[test]
    fn test_method_set() {
        let set = DavMethodSet::WEBDAV_RO;
        assert!(set.has(DavMethod::PropFind));
        assert!(set.has(DavMethod::Get));
        assert!(!set.has(DavMethod::Put));
        assert!(DavMethodSet::WEBDAV_RW.has(DavMethod::Unlock));
    }

    #[test]
    fn test_dav_method() {
        let m = http::Method::from_bytes(b"MKCOL").unwrap();
        assert_eq!(dav_method(&m).unwrap(), DavMethod::MkCol);
        let m = http::Method::from_bytes(b"TRACE").unwrap();
        assert!(dav_method(&m).is_err());
    }
}
