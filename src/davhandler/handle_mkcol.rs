use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::fs::*;
use crate::DavResult;

use super::handle_options::methods_for;
use super::DavContext;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = &ctx.path;

        // we don't do extended MKCOL. Garbage is a bad request, XML we
        // can't act on is not implemented.
        if !body.is_empty() {
            Element::parse(body)?;
            debug!("MKCOL {path} with a body");
            return Err(StatusCode::NOT_IMPLEMENTED.into());
        }

        // `/sub/` names the file `/sub` too. The root always exists.
        match self.resolve(ctx, &path.without_slash()).await {
            Ok(existing) => {
                debug!("MKCOL {path}: already exists");
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
                res.headers_mut()
                    .insert("Allow", self.allow_header(&methods_for(Some(&existing))));
                return Ok(res);
            }
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        self.check_locked(ctx, req, path, false)?;

        let parent = match self.resolve(ctx, &path.parent()).await {
            Ok(Resource::Folder(folder)) => folder,
            Ok(Resource::File(_)) => {
                debug!("MKCOL {path}: parent is a file");
                return Err(StatusCode::FORBIDDEN.into());
            }
            Err(FsError::NotFound) => {
                debug!("MKCOL {path}: no parent");
                return Err(StatusCode::CONFLICT.into());
            }
            Err(e) => return Err(e.into()),
        };

        match self
            .store
            .create_folder(ctx.user(), parent.id, path.file_name())
            .await
        {
            Ok(_) => {}
            Err(FsError::DuplicateName) => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
            Err(e) => return Err(e.into()),
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
