//! Maps request paths onto owner-scoped namespaces and resources.
//!
//! Namespace URLs look like `{prefix}/{owner}/files{path}`.
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::{FsError, FsResult, Resource, ResourceStore, UserId};
use crate::DavResult;

/// Fixed namespace segment following the owner name.
pub(crate) const FILES_SEGMENT: &str = "files";

const USERNAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Where a request lives: the configured prefix and the owner's name.
#[derive(Debug, Clone)]
pub(crate) struct Namespace {
    pub prefix: String,
    pub owner: String,
}

impl Namespace {
    pub fn new(prefix: &str, owner: &str) -> Namespace {
        Namespace {
            prefix: prefix.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
        }
    }

    /// Absolute, encoded href of a path in this namespace.
    pub fn href(&self, path: &DavPath) -> String {
        let owner = utf8_percent_encode(&self.owner, USERNAME).to_string();
        format!(
            "{}/{}/{}{}",
            self.prefix,
            owner,
            FILES_SEGMENT,
            path.as_url_string()
        )
    }
}

/// Resolve `path` in the namespace of `owner`.
///
/// A trailing slash can only name a folder: if such a path resolves to
/// a file the result is `NotFound`, whether or not the file exists.
pub(crate) async fn resolve(
    store: &dyn ResourceStore,
    owner: UserId,
    path: &DavPath,
    include_deleted: bool,
) -> FsResult<Resource> {
    let res = store
        .resource_at_path(owner, &path.without_slash(), include_deleted)
        .await?;
    match res {
        Resource::File(_) if path.is_collection() && !path.is_root() => Err(FsError::NotFound),
        res => Ok(res),
    }
}

/// Split `/{owner}/files{path}` into the owner's name and the
/// owner-relative path.
pub(crate) fn split_namespace(path: &DavPath) -> Option<(String, DavPath)> {
    let s = path.as_str().strip_prefix('/')?;
    let (owner, rest) = s.split_once('/')?;
    if owner.is_empty() {
        return None;
    }
    let rest = rest.strip_prefix(FILES_SEGMENT)?;
    let inner = match rest {
        "" => DavPath::root(),
        r if r.starts_with('/') => DavPath::new(r).ok()?,
        _ => return None,
    };
    Some((owner.to_string(), inner))
}

fn malformed(dest: &str, why: &str) -> DavError {
    debug!("malformed destination {dest}: {why}");
    DavError::MalformedDestination(format!("{dest}: {why}"))
}

/// Parse a `Destination` header (or `moveTo`/`copyTo` parameter).
///
/// The value may be an absolute URL or an absolute path. The handler and
/// mount prefixes are stripped, the next segment is the (URL-decoded)
/// name of the destination owner, and what follows the `files` segment
/// is the destination path.
pub(crate) fn resolve_destination(
    dest: &str,
    prefix: &str,
    mount_path: &str,
) -> DavResult<(String, DavPath)> {
    let raw_path = match url::Url::parse(dest) {
        Ok(url) => url.path().to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = url::Url::parse("http://localhost/").map_err(|_| malformed(dest, "base"))?;
            base.join(dest)
                .map_err(|_| malformed(dest, "unparseable"))?
                .path()
                .to_string()
        }
        Err(_) => return Err(malformed(dest, "unparseable")),
    };

    let prefix = prefix.trim_end_matches('/');
    let rest = raw_path
        .strip_prefix(prefix)
        .ok_or_else(|| malformed(dest, "prefix mismatch"))?;
    let mount_path = mount_path.trim_end_matches('/');
    let rest = rest
        .strip_prefix(mount_path)
        .ok_or_else(|| malformed(dest, "mount path mismatch"))?;

    let rest = rest
        .strip_prefix('/')
        .ok_or_else(|| malformed(dest, "no username"))?;
    let (owner, rest) = rest
        .split_once('/')
        .ok_or_else(|| malformed(dest, "no username"))?;
    let owner = percent_decode_str(owner)
        .decode_utf8()
        .map_err(|_| malformed(dest, "bad username encoding"))?;
    if owner.is_empty() {
        return Err(malformed(dest, "no username"));
    }

    let rest = rest
        .strip_prefix(FILES_SEGMENT)
        .ok_or_else(|| malformed(dest, "not a files namespace"))?;
    let path = match rest {
        "" => DavPath::root(),
        r if r.starts_with('/') => {
            DavPath::from_str_and_prefix(r, "").map_err(|_| malformed(dest, "bad path"))?
        }
        _ => return Err(malformed(dest, "not a files namespace")),
    };
    Ok((owner.into_owned(), path))
}
