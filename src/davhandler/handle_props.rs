use http::{Request, Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent};
use xmltree::Element;

use crate::body::Body;
use crate::davheaders::{headers_get, Depth};
use crate::fs::*;
use crate::ls::DavLockSystem;
use crate::multierror::status_line;
use crate::resolver::Namespace;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, MemBuffer};
use crate::xmltree_ext::{emitter, write_empty, write_text, ElementExt, DAV_NS};
use crate::DavResult;

use super::handle_gethead::content_type;
use super::handle_lock::write_lockdiscovery;
use super::DavContext;

// What `allprop` returns, in this order.
const ALLPROP: &[&str] = &[
    "creationdate",
    "displayname",
    "getlastmodified",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "resourcetype",
    "source",
    "supportedlock",
    "lockdiscovery",
];

/// A property name from a PROPFIND body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Prop {
    name: String,
    ns: Option<String>,
}

impl Prop {
    fn dav(name: &str) -> Prop {
        Prop {
            name: name.to_string(),
            ns: Some(DAV_NS.to_string()),
        }
    }

    fn is_dav(&self) -> bool {
        self.ns.as_deref() == Some(DAV_NS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PropMode {
    AllProp,
    PropName,
    Props(Vec<Prop>),
}

// An unreadable body gets the defaults, like an empty one.
fn parse_propfind(body: &[u8]) -> PropMode {
    if body.is_empty() {
        return PropMode::AllProp;
    }
    let root = match Element::parse2(body) {
        Ok(root) => root,
        Err(e) => {
            debug!("PROPFIND body: {e}, using allprop");
            return PropMode::AllProp;
        }
    };
    let mut mode = PropMode::AllProp;
    for elem in root.child_elems_iter() {
        match elem.name.as_str() {
            "prop" => {
                let props = elem
                    .child_elems_iter()
                    .map(|e| Prop {
                        name: e.name.clone(),
                        ns: e.namespace.clone(),
                    })
                    .collect();
                mode = PropMode::Props(props);
            }
            "propname" => mode = PropMode::PropName,
            "allprop" => mode = PropMode::AllProp,
            _ => {}
        }
    }
    mode
}

// Does the resource have this (live) property.
fn has_prop(res: &Resource, prop: &Prop) -> bool {
    if !prop.is_dav() {
        return false;
    }
    match prop.name.as_str() {
        "creationdate" | "displayname" | "resourcetype" | "source" | "supportedlock"
        | "lockdiscovery" => true,
        "getlastmodified" | "getcontentlength" | "getcontenttype" | "getetag"
        | "getcontentlanguage" => !res.is_folder(),
        _ => false,
    }
}

fn display_name(res: &Resource) -> &str {
    match res.name() {
        "" => "/",
        name => name,
    }
}

struct PropWriter<'a> {
    xw: EventWriter<MemBuffer>,
    mode: PropMode,
    ns: &'a Namespace,
    ls: &'a dyn DavLockSystem,
    owner: UserId,
}

impl<'a> PropWriter<'a> {
    fn new(mode: PropMode, ctx: &'a DavContext, ls: &'a dyn DavLockSystem) -> DavResult<PropWriter<'a>> {
        let mut xw = emitter(MemBuffer::new())?;
        xw.write(XmlEvent::start_element("D:multistatus").ns("D", DAV_NS))?;
        Ok(PropWriter {
            xw,
            mode,
            ns: &ctx.ns,
            ls,
            owner: ctx.owner.id,
        })
    }

    fn write_response(&mut self, res: &Resource) -> DavResult<()> {
        let (found, missing): (Vec<Prop>, Vec<Prop>) = match &self.mode {
            PropMode::AllProp => (
                ALLPROP
                    .iter()
                    .map(|n| Prop::dav(n))
                    .filter(|p| has_prop(res, p))
                    .collect(),
                Vec::new(),
            ),
            PropMode::PropName => {
                let mut names: Vec<Prop> = ALLPROP
                    .iter()
                    .map(|n| Prop::dav(n))
                    .filter(|p| has_prop(res, p))
                    .collect();
                if !res.is_folder() {
                    names.push(Prop::dav("getcontentlanguage"));
                }
                (names, Vec::new())
            }
            PropMode::Props(props) => props.iter().cloned().partition(|p| has_prop(res, p)),
        };
        let names_only = self.mode == PropMode::PropName;

        self.xw.write(XmlEvent::start_element("D:response"))?;
        write_text(&mut self.xw, "D:href", &self.ns.href(res.path()))?;
        if !found.is_empty() {
            self.xw.write(XmlEvent::start_element("D:propstat"))?;
            self.xw.write(XmlEvent::start_element("D:prop"))?;
            for prop in &found {
                if names_only {
                    write_empty(&mut self.xw, &format!("D:{}", prop.name))?;
                } else {
                    self.write_prop(res, &prop.name)?;
                }
            }
            self.xw.write(XmlEvent::end_element())?;
            write_text(&mut self.xw, "D:status", &status_line(StatusCode::OK))?;
            self.xw.write(XmlEvent::end_element())?;
        }
        if !missing.is_empty() {
            self.xw.write(XmlEvent::start_element("D:propstat"))?;
            self.xw.write(XmlEvent::start_element("D:prop"))?;
            for prop in &missing {
                self.write_missing(prop)?;
            }
            self.xw.write(XmlEvent::end_element())?;
            write_text(&mut self.xw, "D:status", &status_line(StatusCode::NOT_FOUND))?;
            self.xw.write(XmlEvent::end_element())?;
        }
        self.xw.write(XmlEvent::end_element())?;
        Ok(())
    }

    fn write_missing(&mut self, prop: &Prop) -> DavResult<()> {
        match prop.ns.as_deref() {
            Some(DAV_NS) => write_empty(&mut self.xw, &format!("D:{}", prop.name))?,
            Some(ns) => {
                self.xw
                    .write(XmlEvent::start_element(prop.name.as_str()).default_ns(ns))?;
                self.xw.write(XmlEvent::end_element())?;
            }
            None => write_empty(&mut self.xw, &prop.name)?,
        }
        Ok(())
    }

    fn write_prop(&mut self, res: &Resource, name: &str) -> DavResult<()> {
        let xw = &mut self.xw;
        match (name, res) {
            ("creationdate", _) => write_text(
                xw,
                "D:creationdate",
                &systemtime_to_rfc3339(res.audit().creation_date),
            )?,
            ("displayname", _) => write_text(xw, "D:displayname", display_name(res))?,
            ("getlastmodified", Resource::File(f)) => write_text(
                xw,
                "D:getlastmodified",
                &systemtime_to_httpdate(f.current_body.audit.modification_date),
            )?,
            ("getcontentlength", Resource::File(f)) => write_text(
                xw,
                "D:getcontentlength",
                &f.current_body.file_size.to_string(),
            )?,
            ("getcontenttype", Resource::File(f)) => write_text(
                xw,
                "D:getcontenttype",
                &content_type(&f.name, &f.current_body.mime_type),
            )?,
            ("getetag", Resource::File(f)) => write_text(xw, "D:getetag", &f.etag())?,
            ("getcontentlanguage", _) => write_empty(xw, "D:getcontentlanguage")?,
            ("resourcetype", Resource::Folder(_)) => {
                xw.write(XmlEvent::start_element("D:resourcetype"))?;
                write_empty(xw, "D:collection")?;
                xw.write(XmlEvent::end_element())?;
            }
            ("resourcetype", Resource::File(_)) => write_empty(xw, "D:resourcetype")?,
            ("source", _) => write_empty(xw, "D:source")?,
            ("supportedlock", _) => {
                xw.write(XmlEvent::start_element("D:supportedlock"))?;
                for scope in ["D:exclusive", "D:shared"] {
                    xw.write(XmlEvent::start_element("D:lockentry"))?;
                    xw.write(XmlEvent::start_element("D:lockscope"))?;
                    write_empty(xw, scope)?;
                    xw.write(XmlEvent::end_element())?;
                    xw.write(XmlEvent::start_element("D:locktype"))?;
                    write_empty(xw, "D:write")?;
                    xw.write(XmlEvent::end_element())?;
                    xw.write(XmlEvent::end_element())?;
                }
                xw.write(XmlEvent::end_element())?;
            }
            ("lockdiscovery", _) => {
                let locks = self.ls.discover(self.owner, res.path());
                write_lockdiscovery(xw, &locks, self.ns)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(mut self) -> DavResult<Response<Body>> {
        self.xw.write(XmlEvent::end_element())?;
        let body = self.xw.into_inner().take();
        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = StatusCode::MULTI_STATUS;
        resp.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(resp)
    }
}

impl crate::DavHandler {
    // The children of a folder the principal may see: subfolders first,
    // then files.
    async fn readable_children(
        &self,
        ctx: &DavContext,
        folder: &FolderResource,
    ) -> DavResult<Vec<Resource>> {
        let mut children = Vec::new();
        for sub in &folder.subfolders {
            match self
                .store
                .resource_at_path(ctx.owner.id, &sub.path.without_slash(), false)
                .await
            {
                Ok(res) => {
                    if self.check_read(ctx, &res).await.is_ok() {
                        children.push(res);
                    }
                }
                Err(FsError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        for file in self.store.child_files(ctx.user(), folder.id, false).await? {
            let res = Resource::File(file);
            if self.check_read(ctx, &res).await.is_ok() {
                children.push(res);
            }
        }
        Ok(children)
    }

    pub(crate) async fn handle_propfind(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let res = self
            .resolve(ctx, &ctx.path)
            .await
            .map_err(|e| ctx.fs_error(e))?;
        self.check_read(ctx, &res).await?;

        let mut depth = match headers_get::<Depth>(req.headers()) {
            Some(Depth::Zero) => 0,
            Some(Depth::One) => 1,
            _ => self.max_depth,
        };
        let mode = parse_propfind(body);
        debug!("PROPFIND {} depth {depth} {mode:?}", ctx.path);

        // breadth first, one level at a time.
        let mut pw = PropWriter::new(mode, ctx, &*self.ls)?;
        let mut level = vec![res];
        loop {
            let mut below = Vec::new();
            for res in &level {
                pw.write_response(res)?;
                if let Resource::Folder(folder) = res {
                    if depth > 0 {
                        below.extend(self.readable_children(ctx, folder).await?);
                    }
                }
            }
            if depth == 0 || below.is_empty() {
                break;
            }
            depth -= 1;
            level = below;
        }
        pw.finish()
    }

    pub(crate) async fn handle_proppatch(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
    ) -> DavResult<Response<Body>> {
        self.check_locked(ctx, req, &ctx.path, false)?;
        Err(StatusCode::NOT_IMPLEMENTED.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_propfind() {
        assert_eq!(parse_propfind(b""), PropMode::AllProp);
        assert_eq!(parse_propfind(b"<not xml"), PropMode::AllProp);
        let body = br#"<?xml version="1.0"?>
            <D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert_eq!(parse_propfind(body), PropMode::PropName);
        let body = br#"<?xml version="1.0"?>
            <D:propfind xmlns:D="DAV:" xmlns:Z="urn:z">
              <D:prop><D:getetag/><Z:color/></D:prop>
            </D:propfind>"#;
        assert_eq!(
            parse_propfind(body),
            PropMode::Props(vec![
                Prop::dav("getetag"),
                Prop {
                    name: "color".to_string(),
                    ns: Some("urn:z".to_string())
                },
            ])
        );
    }
}
