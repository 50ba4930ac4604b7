use std::io::Write;

use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent};
use xml::writer::Result as XmlWResult;
use xmltree::Element;

use crate::body::Body;
use crate::davheaders::{self, headers_get, Depth, LockToken};
use crate::errors::DavError;
use crate::fs::{FsError, Resource};
use crate::ls::DavLock;
use crate::resolver::Namespace;
use crate::util::MemBuffer;
use crate::xmltree_ext::{emitter, write_empty, write_text, ElementExt, DAV_NS};
use crate::DavResult;

use super::DavContext;

/// Write `<D:lockdiscovery>` listing `locks`.
pub(crate) fn write_lockdiscovery<W: Write>(
    xw: &mut EventWriter<W>,
    locks: &[DavLock],
    ns: &Namespace,
) -> XmlWResult<()> {
    xw.write(XmlEvent::start_element("D:lockdiscovery"))?;
    for lock in locks {
        write_activelock(xw, lock, ns)?;
    }
    xw.write(XmlEvent::end_element())
}

fn write_activelock<W: Write>(xw: &mut EventWriter<W>, lock: &DavLock, ns: &Namespace) -> XmlWResult<()> {
    xw.write(XmlEvent::start_element("D:activelock"))?;

    xw.write(XmlEvent::start_element("D:locktype"))?;
    write_empty(xw, "D:write")?;
    xw.write(XmlEvent::end_element())?;

    xw.write(XmlEvent::start_element("D:lockscope"))?;
    write_empty(xw, if lock.shared { "D:shared" } else { "D:exclusive" })?;
    xw.write(XmlEvent::end_element())?;

    write_text(xw, "D:depth", if lock.deep { "Infinity" } else { "0" })?;
    if let Some(owner) = &lock.owner {
        owner.write_ev(xw)?;
    }
    write_text(xw, "D:timeout", &davheaders::timeout_value(lock.timeout))?;

    xw.write(XmlEvent::start_element("D:locktoken"))?;
    write_text(xw, "D:href", &lock.token)?;
    xw.write(XmlEvent::end_element())?;

    xw.write(XmlEvent::start_element("D:lockroot"))?;
    write_text(xw, "D:href", &ns.href(&lock.path))?;
    xw.write(XmlEvent::end_element())?;

    xw.write(XmlEvent::end_element())
}

/// What a LOCK body asks for.
#[derive(Debug)]
struct LockInfo {
    shared: bool,
    owner: Option<Element>,
}

fn bad_lockinfo(why: &str) -> DavError {
    debug!("bad lockinfo: {why}");
    DavError::Status(StatusCode::BAD_REQUEST)
}

fn parse_lockinfo(body: &[u8]) -> DavResult<LockInfo> {
    let info = Element::parse2(body)?;
    if !info.is_dav("lockinfo") {
        return Err(bad_lockinfo("root is not lockinfo"));
    }
    let mut shared = None;
    let mut write = false;
    let mut owner = None;
    for elem in info.child_elems_iter() {
        if elem.namespace.as_deref() != Some(DAV_NS) {
            continue;
        }
        match elem.name.as_str() {
            "lockscope" => {
                for scope in elem.child_elems_iter() {
                    match scope.name.as_str() {
                        "exclusive" => shared = Some(false),
                        "shared" => shared = Some(true),
                        _ => return Err(bad_lockinfo("unknown lockscope")),
                    }
                }
            }
            "locktype" => {
                for t in elem.child_elems_iter() {
                    match t.name.as_str() {
                        "write" => write = true,
                        _ => return Err(bad_lockinfo("unknown locktype")),
                    }
                }
            }
            "owner" => owner = Some(elem.clone()),
            _ => {}
        }
    }
    let shared = shared.ok_or_else(|| bad_lockinfo("no lockscope"))?;
    if !write {
        return Err(bad_lockinfo("no locktype"));
    }
    Ok(LockInfo { shared, owner })
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = &ctx.path;
        let timeout = davheaders::lock_timeout(req.headers());

        let lock = if body.is_empty() {
            // refresh of a lock named in the If: header.
            let tokens = davheaders::if_tokens(req.headers());
            if tokens.is_empty() {
                debug!("LOCK refresh {path} without token");
                return Err(StatusCode::BAD_REQUEST.into());
            }
            let refreshed = tokens
                .iter()
                .find_map(|t| self.ls.refresh(ctx.owner.id, path, t, Some(timeout)).ok());
            match refreshed {
                Some(lock) => lock,
                None => {
                    debug!("LOCK refresh {path}: no lock for {tokens:?}");
                    return Err(StatusCode::PRECONDITION_FAILED.into());
                }
            }
        } else {
            let info = parse_lockinfo(body)?;
            let deep = match headers_get::<Depth>(req.headers()) {
                Some(Depth::Zero) => false,
                Some(Depth::One) => return Err(StatusCode::BAD_REQUEST.into()),
                _ => true,
            };

            // a missing resource can be locked if it could be created.
            match self.resolve(ctx, path).await {
                Ok(res) => self.check_read(ctx, &res).await?,
                Err(FsError::NotFound) => match self.resolve(ctx, &path.parent()).await {
                    Ok(Resource::Folder(_)) => {}
                    Ok(Resource::File(_)) | Err(FsError::NotFound) => {
                        return Err(StatusCode::CONFLICT.into())
                    }
                    Err(e) => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            }

            match self.ls.lock(
                ctx.owner.id,
                path,
                ctx.principal_name(),
                info.owner.as_ref(),
                Some(timeout),
                info.shared,
                deep,
            ) {
                Ok(lock) => lock,
                Err(conflict) => {
                    debug!("LOCK {path}: conflicts with {}", conflict.token);
                    return Err(StatusCode::LOCKED.into());
                }
            }
        };

        let mut xw = emitter(MemBuffer::new())?;
        xw.write(XmlEvent::start_element("D:prop").ns("D", DAV_NS))?;
        write_lockdiscovery(&mut xw, std::slice::from_ref(&lock), &ctx.ns)?;
        xw.write(XmlEvent::end_element())?;
        let buffer = xw.into_inner().take();

        let mut res = Response::new(Body::from(buffer));
        let h = res.headers_mut();
        h.typed_insert(LockToken(lock.token.clone()));
        h.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(res)
    }

    pub(crate) async fn handle_unlock(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
    ) -> DavResult<Response<Body>> {
        if let Some(LockToken(token)) = headers_get::<LockToken>(req.headers()) {
            if self.ls.unlock(ctx.owner.id, &ctx.path, &token).is_err() {
                debug!("UNLOCK {}: no lock {token}", ctx.path);
            }
        }
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::davpath::DavPath;
    use crate::fs::UserId;

    #[test]
    fn test_parse_lockinfo() {
        let body = br#"<?xml version="1.0"?>
            <D:lockinfo xmlns:D="DAV:">
              <D:lockscope><D:shared/></D:lockscope>
              <D:locktype><D:write/></D:locktype>
              <D:owner><D:href>mailto:bob@example.com</D:href></D:owner>
            </D:lockinfo>"#;
        let info = parse_lockinfo(body).unwrap();
        assert!(info.shared);
        assert!(info.owner.is_some());

        let body = br#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope></D:lockinfo>"#;
        assert!(parse_lockinfo(body).is_err());
        let body = br#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:odd/></D:lockscope><D:locktype><D:write/></D:locktype></D:lockinfo>"#;
        assert!(parse_lockinfo(body).is_err());
    }

    #[test]
    fn test_activelock_xml() {
        let lock = DavLock {
            token: "opaquelocktoken:abc".to_string(),
            path: DavPath::new("/a.txt").unwrap(),
            ns: UserId(1),
            principal: None,
            owner: None,
            timeout_at: None,
            timeout: Some(Duration::from_secs(3600)),
            shared: false,
            deep: false,
        };
        let mut xw = emitter(MemBuffer::new()).unwrap();
        xw.write(XmlEvent::start_element("D:prop").ns("D", DAV_NS)).unwrap();
        write_lockdiscovery(&mut xw, &[lock], &Namespace::new("/dav", "alice")).unwrap();
        xw.write(XmlEvent::end_element()).unwrap();
        let out = xw.into_inner().take();
        let s = std::str::from_utf8(&out).unwrap();
        assert!(s.contains("<D:lockscope><D:exclusive></D:exclusive></D:lockscope>"), "{s}");
        assert!(s.contains("<D:timeout>Second-3600</D:timeout>"), "{s}");
        assert!(s.contains("<D:locktoken><D:href>opaquelocktoken:abc</D:href></D:locktoken>"), "{s}");
        assert!(s.contains("<D:lockroot><D:href>/dav/alice/files/a.txt</D:href></D:lockroot>"), "{s}");
    }
}
