//! Utility module to handle the path part of an URL as a namespace path.
//!
//! A [`DavPath`] is always absolute, percent-decoded and normalized:
//! no empty segments, no `.` or `..`. A trailing slash is kept, since
//! it carries meaning (a path ending in `/` can only name a folder).

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;

// Characters that are percent-encoded in a path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

// Container-private directories that are never part of a namespace.
const RESERVED: [&str; 2] = ["/web-inf", "/meta-inf"];
// Longest staging key, in bytes.
const MAX_STAGING_KEY: usize = 64;

/// Decoded, normalized absolute path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DavPath {
    path: String,
}

/// Error returned by some of the DavPath methods.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::Status(http::StatusCode::FORBIDDEN),
        }
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

// Collapse empty, "." and ".." segments.
fn normalize(decoded: &str) -> Result<String, ParseError> {
    if !decoded.starts_with('/') {
        return Err(ParseError::InvalidPath);
    }
    let mut segs: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segs.pop().is_none() {
                    return Err(ParseError::ForbiddenPath);
                }
            }
            s => {
                if s.contains('\0') {
                    return Err(ParseError::InvalidPath);
                }
                segs.push(s);
            }
        }
    }
    let mut path = String::with_capacity(decoded.len());
    for s in &segs {
        path.push('/');
        path.push_str(s);
    }
    let dir_like = decoded.ends_with('/') || decoded.ends_with("/.") || decoded.ends_with("/..");
    if path.is_empty() || dir_like {
        path.push('/');
    }
    Ok(path)
}

impl DavPath {
    /// Build a path from an already decoded string.
    pub fn new(path: &str) -> Result<DavPath, ParseError> {
        Ok(DavPath {
            path: normalize(path)?,
        })
    }

    /// The root path `/`.
    pub fn root() -> DavPath {
        DavPath {
            path: "/".to_string(),
        }
    }

    /// Build a path from the raw (percent-encoded) path of an URL.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        if src == "*" {
            return Ok(DavPath {
                path: "*".to_string(),
            });
        }
        let decoded = percent_decode_str(src)
            .decode_utf8()
            .map_err(|_| ParseError::InvalidPath)?;
        let prefix = prefix.trim_end_matches('/');
        let rest = match decoded.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return Err(ParseError::PrefixMismatch),
        };
        DavPath::new(if rest.is_empty() { "/" } else { rest })
    }

    /// Build a path from the request URI, stripping `prefix`.
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<DavPath, ParseError> {
        match uri.path() {
            "" => Err(ParseError::InvalidPath),
            p => DavPath::from_str_and_prefix(p, prefix),
        }
    }

    /// The decoded path.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// `OPTIONS *`
    pub fn is_star(&self) -> bool {
        self.path == "*"
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Does the path end in a slash.
    pub fn is_collection(&self) -> bool {
        self.path.ends_with('/')
    }

    /// Add a slash to the end of the path (if not already present).
    pub fn add_slash(&mut self) {
        if !self.is_collection() {
            self.path.push('/');
        }
    }

    /// Same path without the trailing slash. Root stays `/`.
    pub fn without_slash(&self) -> DavPath {
        if self.is_root() || !self.is_collection() {
            return self.clone();
        }
        DavPath {
            path: self.path.trim_end_matches('/').to_string(),
        }
    }

    /// Parent folder, without trailing slash.
    pub fn parent(&self) -> DavPath {
        let p = self.without_slash();
        match p.path.rfind('/') {
            Some(0) | None => DavPath::root(),
            Some(idx) => DavPath {
                path: p.path[..idx].to_string(),
            },
        }
    }

    /// Last segment of the path. Empty for the root.
    pub fn file_name(&self) -> &str {
        let p = self.path.trim_end_matches('/');
        match p.rfind('/') {
            Some(idx) => &p[idx + 1..],
            None => p,
        }
    }

    /// Append a single segment.
    pub fn join(&self, name: &str) -> DavPath {
        let mut path = self.without_slash().path;
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name.trim_matches('/'));
        DavPath { path }
    }

    /// Is `other` this path or somewhere below it.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        let me = self.without_slash();
        let other = other.without_slash();
        if me.is_root() {
            return true;
        }
        other.path == me.path
            || (other.path.starts_with(&me.path) && other.path[me.path.len()..].starts_with('/'))
    }

    /// Paths starting with `/WEB-INF` or `/META-INF` (any case).
    pub fn is_reserved(&self) -> bool {
        let lower = self.path.to_ascii_lowercase();
        RESERVED.iter().any(|r| lower.starts_with(r))
    }

    /// Percent-encoded form, for use in `href` and `Location`.
    pub fn as_url_string(&self) -> String {
        if self.is_star() {
            return self.path.clone();
        }
        self.path
            .split('/')
            .map(|s| utf8_percent_encode(s, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// A single filesystem-safe name derived from the path.
    pub fn staging_key(&self) -> String {
        let key: String = self
            .without_slash()
            .path
            .trim_start_matches('/')
            .chars()
            .map(|c| match c {
                '/' => '.',
                '\\' | ':' | '\0' => '_',
                c => c,
            })
            .collect();
        if key.is_empty() {
            return "root".to_string();
        }
        // keep the end of the path, it has the file name.
        let mut start = key.len().saturating_sub(MAX_STAGING_KEY);
        while !key.is_char_boundary(start) {
            start += 1;
        }
        key[start..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(DavPath::new("/a//b/./c").unwrap().as_str(), "/a/b/c");
        assert_eq!(DavPath::new("/a/b/../c/").unwrap().as_str(), "/a/c/");
        assert_eq!(DavPath::new("/").unwrap().as_str(), "/");
        assert_eq!(DavPath::new("/..").unwrap_err(), ParseError::ForbiddenPath);
        assert_eq!(DavPath::new("a").unwrap_err(), ParseError::InvalidPath);
    }

    #[test]
    fn test_prefix() {
        let p = DavPath::from_str_and_prefix("/dav/alice/files/a%20b.txt", "/dav/").unwrap();
        assert_eq!(p.as_str(), "/alice/files/a b.txt");
        let p = DavPath::from_str_and_prefix("/dav", "/dav").unwrap();
        assert!(p.is_root());
        assert_eq!(
            DavPath::from_str_and_prefix("/davx/a", "/dav").unwrap_err(),
            ParseError::PrefixMismatch
        );
    }

    #[test]
    fn test_parent_and_name() {
        let p = DavPath::new("/docs/sub/").unwrap();
        assert!(p.is_collection());
        assert_eq!(p.file_name(), "sub");
        assert_eq!(p.parent().as_str(), "/docs");
        assert_eq!(p.without_slash().as_str(), "/docs/sub");
        assert_eq!(DavPath::new("/a").unwrap().parent().as_str(), "/");
        assert_eq!(DavPath::root().join("x").as_str(), "/x");
        assert_eq!(p.join("y.txt").as_str(), "/docs/sub/y.txt");
    }

    #[test]
    fn test_ancestor() {
        let a = DavPath::new("/a").unwrap();
        assert!(a.is_ancestor_of(&DavPath::new("/a/b").unwrap()));
        assert!(a.is_ancestor_of(&DavPath::new("/a/").unwrap()));
        assert!(!a.is_ancestor_of(&DavPath::new("/ab").unwrap()));
        assert!(DavPath::root().is_ancestor_of(&a));
    }

    #[test]
    fn test_reserved() {
        assert!(DavPath::new("/WEB-INF").unwrap().is_reserved());
        assert!(DavPath::new("/meta-inf/x").unwrap().is_reserved());
        assert!(DavPath::new("/web-information").unwrap().is_reserved());
        assert!(DavPath::new("/WEB-INFO/x").unwrap().is_reserved());
        assert!(!DavPath::new("/docs/WEB-INF").unwrap().is_reserved());
    }

    #[test]
    fn test_url_string_and_key() {
        let p = DavPath::new("/my docs/a#1.txt").unwrap();
        assert_eq!(p.as_url_string(), "/my%20docs/a%231.txt");
        assert_eq!(p.staging_key(), "my docs.a#1.txt");
        assert_eq!(DavPath::root().staging_key(), "root");

        let long = format!("/{}/{}/f.txt", "a".repeat(150), "é".repeat(150));
        let key = DavPath::new(&long).unwrap().staging_key();
        assert!(key.len() <= 64);
        assert!(key.ends_with(".f.txt"));
    }
}
