//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::ls::*;
use crate::resolver::{self, Namespace};
use crate::staging::StagingArea;
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::DavResult;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_post;
mod handle_props;
mod handle_put;

/// Default read buffer size in bytes.
pub(crate) const READ_BUF_SIZE: usize = 8192;
/// How deep a `Depth: infinity` PROPFIND descends.
pub(crate) const MAX_DEPTH: u32 = 3;
// Largest request body we read into memory (XML, forms).
const MAX_BODY_SIZE: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Storage backend.
    store: Arc<dyn ResourceStore>,
    /// Locksystem backend. Defaults to a `MemLs`.
    ls: Option<Arc<dyn DavLockSystem>>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Does GET on a folder return an index.
    autoindex: bool,
    /// read buffer size in bytes
    read_buf_size: usize,
    /// Where partial PUTs are merged.
    staging_dir: Option<PathBuf>,
    /// Does the default locksystem block writers.
    enforce_locks: bool,
    /// Depth limit of PROPFIND.
    max_depth: u32,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(store: Arc<dyn ResourceStore>) -> DavBuilder {
        Self {
            prefix: String::new(),
            store,
            ls: None,
            allow: DavMethodSet::all(),
            autoindex: true,
            read_buf_size: READ_BUF_SIZE,
            staging_dir: None,
            enforce_locks: false,
            max_depth: MAX_DEPTH,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before the `/{owner}/files` part of
    /// the request path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Replace the storage backend.
    pub fn store(self, store: Arc<dyn ResourceStore>) -> Self {
        let mut this = self;
        this.store = store;
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: Arc<dyn DavLockSystem>) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Does a GET on a folder produce an index (default true).
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Read buffer size in bytes
    pub fn read_buf_size(self, size: usize) -> Self {
        let mut this = self;
        this.read_buf_size = size;
        this
    }

    /// Directory for the temporary files of partial PUTs. Defaults to
    /// the temp dir of the OS.
    pub fn staging_dir(self, dir: impl Into<PathBuf>) -> Self {
        let mut this = self;
        this.staging_dir = Some(dir.into());
        this
    }

    /// Make the default locksystem refuse writes to locked resources
    /// unless the lock token is submitted. Without this, locks are
    /// advisory. Ignored when a locksystem is set explicitly.
    pub fn enforce_locks(self, enforce: bool) -> Self {
        let mut this = self;
        this.enforce_locks = enforce;
        this
    }

    /// How many levels a `Depth: infinity` PROPFIND descends.
    pub fn max_depth(self, depth: u32) -> Self {
        let mut this = self;
        this.max_depth = depth;
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) ls: Arc<dyn DavLockSystem>,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
    pub(crate) autoindex: bool,
    pub(crate) read_buf_size: usize,
    pub(crate) staging: StagingArea,
    pub(crate) max_depth: u32,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        let ls: Arc<dyn DavLockSystem> = match cfg.ls {
            Some(ls) => ls,
            None => MemLs::new(cfg.enforce_locks),
        };
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store,
            ls,
            allow: cfg.allow,
            principal: None,
            autoindex: cfg.autoindex,
            read_buf_size: cfg.read_buf_size,
            staging: StagingArea::new(cfg.staging_dir),
            max_depth: cfg.max_depth,
        }
    }
}

/// Per-request state: who is asking, and in whose namespace.
pub(crate) struct DavContext {
    pub method: DavMethod,
    /// The authenticated user. `None` when authentication was deferred.
    pub principal: Option<User>,
    /// Owner of the namespace.
    pub owner: User,
    pub ns: Namespace,
    /// Request path within the namespace.
    pub path: DavPath,
}

impl DavContext {
    // Anonymous requests only get this far for resources that are
    // readable for all, and act as the owner towards the store.
    pub fn user(&self) -> UserId {
        match &self.principal {
            Some(u) => u.id,
            None => self.owner.id,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal.is_none()
    }

    pub fn principal_name(&self) -> Option<&str> {
        self.principal.as_ref().map(|u| u.username.as_str())
    }

    /// Store error to handler error. Without a principal, a missing
    /// resource is reported as forbidden.
    pub fn fs_error(&self, e: FsError) -> DavError {
        match e {
            FsError::NotFound if self.is_anonymous() => DavError::Status(StatusCode::FORBIDDEN),
            e => DavError::FsError(e),
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(store: Arc<dyn ResourceStore>) -> DavBuilder {
        DavBuilder::new(store)
    }

    /// Handle an anonymous webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request on behalf of `principal`, the name of the
    /// authenticated user. `None` is an anonymous request.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        this.principal = principal.map(Arc::new);
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(prefix);
        }
        this.principal = principal.map(Arc::new);
        this.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) async fn resolve(&self, ctx: &DavContext, path: &DavPath) -> FsResult<Resource> {
        resolver::resolve(&*self.store, ctx.owner.id, path, false).await
    }

    // May the principal read this resource.
    pub(crate) async fn check_read(&self, ctx: &DavContext, res: &Resource) -> DavResult<()> {
        let ok = match (&ctx.principal, res) {
            (None, res) => res.read_for_all(),
            (Some(user), Resource::Folder(f)) => self.store.can_read_folder(user.id, f.id).await?,
            (Some(user), res) => self.store.permissions(user.id, res).await?.read,
        };
        if ok {
            Ok(())
        } else {
            debug!("{} may not read {}", ctx.principal_name().unwrap_or("anonymous"), res.path());
            Err(StatusCode::FORBIDDEN.into())
        }
    }

    // Refuse to write a locked resource unless one of its tokens was submitted.
    pub(crate) fn check_locked(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        path: &DavPath,
        deep: bool,
    ) -> DavResult<()> {
        self.check_locked_in(ctx.owner.id, ctx, req, path, deep)
    }

    // Same, for a path in the namespace of `ns`.
    pub(crate) fn check_locked_in(
        &self,
        ns: UserId,
        ctx: &DavContext,
        req: &Request<()>,
        path: &DavPath,
        deep: bool,
    ) -> DavResult<()> {
        let tokens = davheaders::submitted_tokens(req.headers());
        match self.ls.check(ns, path, ctx.principal_name(), deep, &tokens) {
            Ok(()) => Ok(()),
            Err(lock) => {
                debug!("{} is locked by {}", path, lock.token);
                Err(StatusCode::LOCKED.into())
            }
        }
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // Find out who is asking, and in whose namespace.
    async fn context(&self, method: DavMethod, path: &DavPath) -> DavResult<DavContext> {
        let (owner_name, inner) = match resolver::split_namespace(path) {
            Some(v) => v,
            None => {
                debug!("{path} is not in a namespace");
                return Err(StatusCode::NOT_FOUND.into());
            }
        };

        let principal = match &self.principal {
            Some(name) => match self.store.find_owner(name).await {
                Ok(user) => Some(user),
                Err(e) => {
                    debug!("unknown principal {name}: {e}");
                    return Err(StatusCode::FORBIDDEN.into());
                }
            },
            None => None,
        };

        let owner = match self.store.find_owner(&owner_name).await {
            Ok(user) => user,
            Err(FsError::NotFound) if principal.is_none() => {
                return Err(StatusCode::FORBIDDEN.into());
            }
            Err(e) => return Err(e.into()),
        };

        if inner.is_reserved() {
            debug!("refusing reserved path {inner}");
            return Err(StatusCode::FORBIDDEN.into());
        }
        if principal.is_none() && method.is_mutating() {
            debug!("anonymous {} refused", method.as_str());
            return Err(StatusCode::FORBIDDEN.into());
        }

        Ok(DavContext {
            method,
            principal,
            ns: Namespace::new(&self.prefix, &owner.username),
            owner,
            path: inner,
        })
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::builder()
                    .header("Content-Length", "0")
                    .status(err.statuscode());
                if err.must_close() {
                    resp = resp.header("connection", "close");
                }
                resp.body(Body::empty()).unwrap_or_else(|_| {
                    let mut resp = Response::new(Body::empty());
                    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    resp
                })
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(_) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Ok(self.method_not_allowed());
            }
        };

        // see if method is allowed.
        if !self.allow.has(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        debug!("== START REQUEST {:?} {}", method, path);

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expect no body, or a pre-read Vec<u8>.
        if method == DavMethod::Put {
            let ctx = self.context(method, &path).await?;
            return self.handle_put(&ctx, &req, body).await;
        }
        let body = self.read_request(body, MAX_BODY_SIZE).await?;

        // Not all methods accept a body.
        match method {
            DavMethod::PropFind
            | DavMethod::PropPatch
            | DavMethod::Lock
            | DavMethod::MkCol
            | DavMethod::Post => {}
            _ => {
                if !body.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        if method == DavMethod::Options && (path.is_star() || path.is_root()) {
            return Ok(self.handle_options_server());
        }

        let ctx = self.context(method, &path).await?;
        match method {
            DavMethod::Options => self.handle_options(&ctx).await,
            DavMethod::PropFind => self.handle_propfind(&ctx, &req, &body).await,
            DavMethod::PropPatch => self.handle_proppatch(&ctx, &req).await,
            DavMethod::MkCol => self.handle_mkcol(&ctx, &req, &body).await,
            DavMethod::Delete => self.handle_delete(&ctx, &req).await,
            DavMethod::Lock => self.handle_lock(&ctx, &req, &body).await,
            DavMethod::Unlock => self.handle_unlock(&ctx, &req).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&ctx, &req).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&ctx, &req).await,
            DavMethod::Post => self.handle_post(&ctx, &req).await,
            DavMethod::Put => Err(StatusCode::INTERNAL_SERVER_ERROR.into()),
        }
    }
}
