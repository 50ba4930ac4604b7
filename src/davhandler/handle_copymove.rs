use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders::{headers_get, Destination, Overwrite};
use crate::davpath::DavPath;
use crate::errors::fserror_to_status;
use crate::fs::*;
use crate::multierror::MultiStatus;
use crate::resolver::{self, Namespace};
use crate::util::DavMethod;
use crate::DavResult;

use super::DavContext;

impl crate::DavHandler {
    // Copy `src` (in the request namespace) to `dest` in the namespace
    // of `dest_owner`, depth first. Failures are keyed by source path.
    pub(crate) fn copy_tree<'a>(
        &'a self,
        ctx: &'a DavContext,
        src: Resource,
        dest_owner: UserId,
        dest: DavPath,
    ) -> BoxFuture<'a, MultiStatus> {
        async move {
            let user = ctx.user();
            let mut ms = MultiStatus::new();
            let folder = match src {
                Resource::File(file) => {
                    if let Err(e) = self.store.copy_file(user, file.id, dest_owner, &dest).await {
                        debug!("copy {} -> {dest}: {e}", file.path);
                        ms.add(file.path, fserror_to_status(&e));
                    }
                    return ms;
                }
                Resource::Folder(folder) => folder,
            };

            if let Err(e) = self.store.copy_folder(user, folder.id, dest_owner, &dest).await {
                debug!("copy {} -> {dest}: {e}", folder.path);
                ms.add(folder.path.clone(), fserror_to_status(&e));
                return ms;
            }

            for sub in &folder.subfolders {
                match self.store.resource_at_path(ctx.owner.id, &sub.path, false).await {
                    Ok(res) => {
                        let below = self.copy_tree(ctx, res, dest_owner, dest.join(&sub.name)).await;
                        ms.merge(below);
                    }
                    Err(e) => ms.add(sub.path.clone(), fserror_to_status(&e)),
                }
            }

            match self.store.child_files(user, folder.id, false).await {
                Ok(files) => {
                    for file in files {
                        let to = dest.join(&file.name);
                        ms.merge(self.copy_tree(ctx, Resource::File(file), dest_owner, to).await);
                    }
                }
                Err(e) => ms.add(folder.path.clone(), fserror_to_status(&e)),
            }
            ms
        }
        .boxed()
    }

    // Parse the destination of a COPY/MOVE (or a POST moveTo/copyTo)
    // and look up its owner.
    pub(crate) async fn destination(&self, dest: &str) -> DavResult<(User, DavPath)> {
        let (owner_name, path) = resolver::resolve_destination(dest, &self.prefix, "")?;
        if path.is_reserved() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        match self.store.find_owner(&owner_name).await {
            Ok(owner) => Ok((owner, path)),
            Err(FsError::NotFound) => {
                debug!("destination owner {owner_name} does not exist");
                Err(StatusCode::NOT_FOUND.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn handle_copymove(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
    ) -> DavResult<Response<Body>> {
        let path = &ctx.path;
        let is_move = ctx.method == DavMethod::Move;

        let dest = match headers_get::<Destination>(req.headers()) {
            Some(Destination(dest)) => dest,
            None => return Err(StatusCode::BAD_REQUEST.into()),
        };
        let (dest_owner, dest) = self.destination(&dest).await?;
        let overwrite = headers_get::<Overwrite>(req.headers())
            .map(|o| o.0)
            .unwrap_or(true);

        let src = self.resolve(ctx, path).await.map_err(|e| ctx.fs_error(e))?;
        self.check_read(ctx, &src).await?;

        // can't copy or move onto itself or into its own subtree.
        if dest_owner.id == ctx.owner.id && src.path().is_ancestor_of(&dest) {
            debug!("{} {path} -> {dest}: destination inside source", ctx.method.as_str());
            return Err(StatusCode::FORBIDDEN.into());
        }
        if is_move {
            if let Resource::Folder(folder) = &src {
                if folder.parent.is_none() {
                    return Err(StatusCode::FORBIDDEN.into());
                }
            }
            self.check_locked(ctx, req, path, true)?;
        }
        self.check_locked_in(dest_owner.id, ctx, req, &dest, true)?;

        let existed = match resolver::resolve(&*self.store, dest_owner.id, &dest, false).await {
            Ok(existing) => {
                if !overwrite {
                    debug!("{} {path} -> {dest}: exists, no overwrite", ctx.method.as_str());
                    return Err(StatusCode::PRECONDITION_FAILED.into());
                }
                let ms = self.delete_resource(ctx, req, dest_owner.id, &existing).await;
                if !ms.is_empty() {
                    // these paths are in the destination namespace.
                    return ms.into_response(&Namespace::new(&self.prefix, &dest_owner.username));
                }
                true
            }
            Err(FsError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };

        match resolver::resolve(&*self.store, dest_owner.id, &dest.parent(), false).await {
            Ok(Resource::Folder(_)) => {}
            Ok(Resource::File(_)) | Err(FsError::NotFound) => {
                debug!("{} {path} -> {dest}: no parent", ctx.method.as_str());
                return Err(StatusCode::CONFLICT.into());
            }
            Err(e) => return Err(e.into()),
        }

        let dest = dest.without_slash();
        let ms = self.copy_tree(ctx, src.clone(), dest_owner.id, dest).await;
        if !ms.is_empty() {
            return ms.into_response(&ctx.ns);
        }
        if is_move {
            let ms = self.delete_resource(ctx, req, ctx.owner.id, &src).await;
            if !ms.is_empty() {
                return ms.into_response(&ctx.ns);
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(res)
    }
}

