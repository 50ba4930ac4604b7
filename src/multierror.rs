use http::{Response, StatusCode};
use xml::writer::XmlEvent;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::resolver::Namespace;
use crate::util::MemBuffer;
use crate::xmltree_ext::{emitter, write_text};
use crate::DavResult;

/// `HTTP/1.1 404 Not Found`
pub(crate) fn status_line(status: StatusCode) -> String {
    format!("HTTP/1.1 {status}")
}

/// Per-path outcomes of a tree operation. Only failures are recorded.
///
/// Every recursive step returns its own `MultiStatus`, and the caller
/// merges it into its own.
#[derive(Debug, Default)]
pub(crate) struct MultiStatus {
    entries: Vec<(DavPath, StatusCode)>,
}

impl MultiStatus {
    pub fn new() -> MultiStatus {
        MultiStatus::default()
    }

    pub fn single(path: DavPath, status: StatusCode) -> MultiStatus {
        MultiStatus {
            entries: vec![(path, status)],
        }
    }

    pub fn add(&mut self, path: DavPath, status: StatusCode) {
        self.entries.push((path, status));
    }

    pub fn merge(&mut self, other: MultiStatus) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Render as a `207 Multi-Status` response.
    pub fn into_response(self, ns: &Namespace) -> DavResult<Response<Body>> {
        let mut xw = emitter(MemBuffer::new())?;
        xw.write(XmlEvent::start_element("D:multistatus").ns("D", "DAV:"))?;
        for (path, status) in &self.entries {
            xw.write(XmlEvent::start_element("D:response"))?;
            write_text(&mut xw, "D:href", &ns.href(path))?;
            write_text(&mut xw, "D:status", &status_line(*status))?;
            xw.write(XmlEvent::end_element())?;
        }
        xw.write(XmlEvent::end_element())?;
        let body = xw.into_inner().take();

        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = StatusCode::MULTI_STATUS;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    #[test]
    fn test_merge() {
        let mut ms = MultiStatus::new();
        assert!(ms.is_empty());
        let mut child = MultiStatus::new();
        child.add(p("/a/b"), StatusCode::FORBIDDEN);
        ms.merge(child);
        ms.merge(MultiStatus::new());
        assert_eq!(ms.len(), 1);
        ms.add(p("/a/c"), StatusCode::NOT_FOUND);
        assert_eq!(ms.len(), 2);
        assert!(!ms.is_empty());
    }

    #[tokio::test]
    async fn test_render() {
        let ms = MultiStatus::single(p("/a b"), StatusCode::FORBIDDEN);
        let resp = ms.into_response(&Namespace::new("/dav", "alice")).unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let body: Vec<bytes::Bytes> = resp.into_body().try_collect().await.unwrap();
        let body = String::from_utf8(body.concat()).unwrap();
        assert!(body.contains("<D:href>/dav/alice/files/a%20b</D:href>"), "{body}");
        assert!(body.contains("<D:status>HTTP/1.1 403 Forbidden</D:status>"), "{body}");
    }
}
