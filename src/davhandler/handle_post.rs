use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::*;
use crate::resolver;
use crate::DavResult;

use super::DavContext;

/// What a POST asks for, from its query string.
#[derive(Debug, PartialEq, Eq)]
enum PostOp {
    MoveTo(String),
    CopyTo(String),
    Trash,
    Restore,
}

fn parse_query(query: Option<&str>) -> DavResult<Option<PostOp>> {
    let params: Vec<(String, String)> = url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    if params.len() > 1 {
        debug!("POST with {} parameters", params.len());
        return Err(StatusCode::BAD_REQUEST.into());
    }
    let op = params.into_iter().next().and_then(|(k, v)| match k.as_str() {
        "moveTo" => Some(PostOp::MoveTo(v)),
        "copyTo" => Some(PostOp::CopyTo(v)),
        "trash" => Some(PostOp::Trash),
        "restore" => Some(PostOp::Restore),
        _ => None,
    });
    Ok(op)
}

// Errors of the store operation itself.
fn op_error(e: FsError) -> DavError {
    match e {
        FsError::InsufficientPermissions => StatusCode::METHOD_NOT_ALLOWED.into(),
        e => e.into(),
    }
}

// A resource can't be moved or copied into itself.
fn check_outside(ctx: &DavContext, res: &Resource, dest_owner: UserId, dest: &DavPath) -> DavResult<()> {
    if dest_owner == ctx.owner.id && res.path().is_ancestor_of(dest) {
        debug!("POST {} -> {dest}: destination inside source", res.path());
        return Err(StatusCode::FORBIDDEN.into());
    }
    Ok(())
}

impl crate::DavHandler {
    pub(crate) async fn handle_post(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
    ) -> DavResult<Response<Body>> {
        let op = match parse_query(req.uri().query())? {
            Some(op) => op,
            None => {
                debug!("POST {} without a known operation", ctx.path);
                return Err(StatusCode::NOT_IMPLEMENTED.into());
            }
        };
        let path = &ctx.path;
        let user = ctx.user();

        // trashed resources stay addressable for these.
        let res = resolver::resolve(&*self.store, ctx.owner.id, path, true)
            .await
            .map_err(|e| ctx.fs_error(e))?;
        debug!("POST {path}: {op:?}");

        let result = match op {
            PostOp::MoveTo(dest) | PostOp::CopyTo(dest) if res.is_deleted() => {
                debug!("POST {path} -> {dest}: source is in the trash");
                return Err(StatusCode::NOT_FOUND.into());
            }
            PostOp::MoveTo(dest) => {
                let (dest_owner, dest) = self.destination(&dest).await?;
                check_outside(ctx, &res, dest_owner.id, &dest)?;
                self.check_locked(ctx, req, path, true)?;
                self.check_locked_in(dest_owner.id, ctx, req, &dest, false)?;
                self.check_vacant(dest_owner.id, &dest).await?;
                let moved = match &res {
                    Resource::File(f) => {
                        self.store
                            .move_file_to_path(user, f.id, dest_owner.id, &dest)
                            .await
                    }
                    Resource::Folder(f) => {
                        self.store
                            .move_folder_to_path(user, f.id, dest_owner.id, &dest)
                            .await
                    }
                };
                if moved.is_ok() {
                    let _ = self.ls.delete(ctx.owner.id, path);
                }
                moved
            }
            PostOp::CopyTo(dest) => {
                let (dest_owner, dest) = self.destination(&dest).await?;
                check_outside(ctx, &res, dest_owner.id, &dest)?;
                self.check_locked_in(dest_owner.id, ctx, req, &dest, false)?;
                self.check_vacant(dest_owner.id, &dest).await?;
                let ms = self.copy_tree(ctx, res, dest_owner.id, dest).await;
                if !ms.is_empty() {
                    return ms.into_response(&ctx.ns);
                }
                Ok(())
            }
            PostOp::Trash => {
                self.check_locked(ctx, req, path, true)?;
                match &res {
                    Resource::File(f) => self.store.trash_file(user, f.id).await,
                    Resource::Folder(f) => self.store.trash_folder(user, f.id).await,
                }
            }
            PostOp::Restore => match &res {
                Resource::File(f) => self.store.restore_file(user, f.id).await,
                Resource::Folder(f) => self.store.restore_folder(user, f.id).await,
            },
        };
        result.map_err(op_error)?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::OK;
        Ok(res)
    }

    // A POST never replaces what is already at its destination.
    async fn check_vacant(&self, owner: UserId, dest: &DavPath) -> DavResult<()> {
        match resolver::resolve(&*self.store, owner, dest, true).await {
            Ok(_) => {
                debug!("POST destination {dest} already exists");
                Err(StatusCode::CONFLICT.into())
            }
            Err(FsError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
