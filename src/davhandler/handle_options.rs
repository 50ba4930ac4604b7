use headers::HeaderMapExt;
use http::{HeaderValue, Response, StatusCode};

use crate::body::Body;
use crate::fs::Resource;
use crate::util::DavMethod;
use crate::DavResult;

use super::DavContext;

// Methods that make sense on a path that doesn't exist yet.
const UNMAPPED: &[DavMethod] = &[
    DavMethod::Options,
    DavMethod::MkCol,
    DavMethod::Put,
    DavMethod::Lock,
];

const MAPPED: &[DavMethod] = &[
    DavMethod::Options,
    DavMethod::Get,
    DavMethod::Head,
    DavMethod::Post,
    DavMethod::Delete,
    DavMethod::PropPatch,
    DavMethod::Copy,
    DavMethod::Move,
    DavMethod::Lock,
    DavMethod::Unlock,
    DavMethod::PropFind,
];

const ALL: &[DavMethod] = &[
    DavMethod::Options,
    DavMethod::Get,
    DavMethod::Head,
    DavMethod::Post,
    DavMethod::Delete,
    DavMethod::PropPatch,
    DavMethod::Copy,
    DavMethod::Move,
    DavMethod::Lock,
    DavMethod::Unlock,
    DavMethod::PropFind,
    DavMethod::Put,
    DavMethod::MkCol,
];

/// Methods that apply to a resource (or to a missing one).
pub(crate) fn methods_for(res: Option<&Resource>) -> Vec<DavMethod> {
    match res {
        None => UNMAPPED.to_vec(),
        Some(Resource::Folder(_)) => MAPPED.to_vec(),
        Some(Resource::File(_)) => {
            let mut v = MAPPED.to_vec();
            v.push(DavMethod::Put);
            v
        }
    }
}

impl crate::DavHandler {
    // `Allow:` value, leaving out what this handler was configured not to do.
    pub(crate) fn allow_header(&self, methods: &[DavMethod]) -> HeaderValue {
        let v: Vec<&str> = methods
            .iter()
            .filter(|m| self.allow.has(**m))
            .map(|m| m.as_str())
            .collect();
        HeaderValue::from_str(&v.join(", ")).unwrap_or_else(|_| HeaderValue::from_static("OPTIONS"))
    }

    fn options_response(&self, methods: &[DavMethod]) -> Response<Body> {
        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();
        h.insert("DAV", HeaderValue::from_static("1,2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.insert("Allow", self.allow_header(methods));
        h.typed_insert(headers::ContentLength(0));
        res
    }

    /// `405 Method Not Allowed`, listing everything we do support.
    pub(crate) fn method_not_allowed(&self) -> Response<Body> {
        let mut res = self.options_response(ALL);
        *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        res
    }

    /// OPTIONS on `*` or on the root of the handler.
    pub(crate) fn handle_options_server(&self) -> Response<Body> {
        self.options_response(ALL)
    }

    pub(crate) async fn handle_options(&self, ctx: &DavContext) -> DavResult<Response<Body>> {
        // an unreadable resource looks like a missing one.
        let res = match self.resolve(ctx, &ctx.path).await {
            Ok(res) if self.check_read(ctx, &res).await.is_ok() => Some(res),
            _ => None,
        };
        Ok(self.options_response(&methods_for(res.as_ref())))
    }
}
