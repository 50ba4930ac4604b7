use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::fs::*;
use crate::multierror::MultiStatus;
use crate::DavResult;

use super::DavContext;

// Status of something that failed to go away inside a collection.
fn member_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::InsufficientPermissions => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Status of the resource named in the request.
fn target_status(e: FsError) -> StatusCode {
    match e {
        FsError::InsufficientPermissions => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl crate::DavHandler {
    // Delete everything inside `folder`, depth first. Subfolders are only
    // removed when nothing below them failed.
    pub(crate) fn delete_members<'a>(
        &'a self,
        ctx: &'a DavContext,
        req: &'a Request<()>,
        ns: UserId,
        folder: &'a FolderResource,
    ) -> BoxFuture<'a, MultiStatus> {
        async move {
            let mut ms = MultiStatus::new();
            let user = ctx.user();

            for sub in &folder.subfolders {
                let sub = match self.store.resource_at_path(ns, &sub.path, false).await {
                    Ok(Resource::Folder(f)) => f,
                    Ok(Resource::File(_)) => continue,
                    Err(e) => {
                        ms.add(sub.path.clone(), member_status(&e));
                        continue;
                    }
                };
                if self.check_locked_in(ns, ctx, req, &sub.path, false).is_err() {
                    ms.add(sub.path.clone(), StatusCode::LOCKED);
                    continue;
                }
                let below = self.delete_members(ctx, req, ns, &sub).await;
                if !below.is_empty() {
                    ms.merge(below);
                    continue;
                }
                match self.store.delete_folder(user, sub.id).await {
                    Ok(()) => {
                        let _ = self.ls.delete(ns, &sub.path);
                    }
                    Err(e) => {
                        debug!("delete {}: {e}", sub.path);
                        ms.add(sub.path.clone(), member_status(&e));
                    }
                }
            }

            let files = match self.store.child_files(user, folder.id, false).await {
                Ok(files) => files,
                Err(e) => {
                    ms.add(folder.path.clone(), member_status(&e));
                    return ms;
                }
            };
            for file in files {
                if self.check_locked_in(ns, ctx, req, &file.path, false).is_err() {
                    ms.add(file.path, StatusCode::LOCKED);
                    continue;
                }
                match self.store.delete_file(user, file.id).await {
                    Ok(()) => {
                        let _ = self.ls.delete(ns, &file.path);
                    }
                    Err(e) => {
                        debug!("delete {}: {e}", file.path);
                        ms.add(file.path, member_status(&e));
                    }
                }
            }
            ms
        }
        .boxed()
    }

    // Delete a resource in `ns` and what is below it. Used when a COPY or
    // MOVE overwrites its destination.
    pub(crate) async fn delete_resource(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        ns: UserId,
        res: &Resource,
    ) -> MultiStatus {
        let user = ctx.user();
        let (path, result) = match res {
            Resource::File(file) => (&file.path, self.store.delete_file(user, file.id).await),
            Resource::Folder(folder) => {
                let ms = self.delete_members(ctx, req, ns, folder).await;
                if !ms.is_empty() {
                    return ms;
                }
                (&folder.path, self.store.delete_folder(user, folder.id).await)
            }
        };
        match result {
            Ok(()) => {
                let _ = self.ls.delete(ns, path);
                MultiStatus::new()
            }
            Err(e) => MultiStatus::single(path.clone(), member_status(&e)),
        }
    }

    pub(crate) async fn handle_delete(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
    ) -> DavResult<Response<Body>> {
        let path = &ctx.path;
        let res = self.resolve(ctx, path).await.map_err(|e| ctx.fs_error(e))?;
        self.check_locked(ctx, req, path, false)?;

        match res {
            Resource::File(file) => {
                if let Err(e) = self.store.delete_file(ctx.user(), file.id).await {
                    debug!("delete {path}: {e}");
                    return Err(target_status(e).into());
                }
            }
            Resource::Folder(folder) => {
                if folder.parent.is_none() {
                    debug!("refusing to delete the root of {}", ctx.owner.username);
                    return Err(StatusCode::FORBIDDEN.into());
                }
                let ms = self.delete_members(ctx, req, ctx.owner.id, &folder).await;
                if !ms.is_empty() {
                    debug!("delete {path}: {} members failed", ms.len());
                    return ms.into_response(&ctx.ns);
                }
                if let Err(e) = self.store.delete_folder(ctx.user(), folder.id).await {
                    debug!("delete {path}: {e}");
                    return Err(target_status(e).into());
                }
            }
        }
        let _ = self.ls.delete(ctx.owner.id, path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statuses() {
        assert_eq!(member_status(&FsError::InsufficientPermissions), StatusCode::FORBIDDEN);
        assert_eq!(member_status(&FsError::QuotaExceeded), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            target_status(FsError::InsufficientPermissions),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(target_status(FsError::NotFound), StatusCode::NOT_FOUND);
    }
}
