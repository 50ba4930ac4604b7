use std::error::Error as StdError;
use std::io;

use bytes::Buf;
use futures_util::StreamExt;
use headers::HeaderMapExt;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional::{check_absent, check_preconditions, Validators};
use crate::errors::DavError;
use crate::fs::*;
use crate::staging::PutRange;
use crate::DavResult;

use super::DavContext;

// Store errors of the final create/update. The parent or the file
// vanishing underneath us is a conflict, like a missing parent is.
fn put_error(e: FsError) -> DavError {
    match e {
        FsError::NotFound => StatusCode::CONFLICT.into(),
        e => e.into(),
    }
}

fn body_error<E: StdError>(e: E) -> DavError {
    debug!("PUT body: {e}");
    DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
}

impl crate::DavHandler {
    // Write the request body into a new upload.
    async fn upload_body<ReqBody, ReqData, ReqError>(
        &self,
        ctx: &DavContext,
        body: ReqBody,
    ) -> DavResult<UploadedContent>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut upload = self.store.open_upload(ctx.user()).await?;
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(body_error)?;
            let chunk = buf.copy_to_bytes(buf.remaining());
            if !chunk.is_empty() {
                upload.write_bytes(chunk).await?;
            }
        }
        Ok(upload.finish().await?)
    }

    async fn upload_stream(&self, ctx: &DavContext, mut src: ByteStream) -> DavResult<UploadedContent> {
        let mut upload = self.store.open_upload(ctx.user()).await?;
        while let Some(chunk) = src.next().await {
            upload.write_bytes(chunk?).await?;
        }
        Ok(upload.finish().await?)
    }

    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let path = &ctx.path;
        if path.is_root() || path.is_collection() {
            debug!("PUT to folder name {path}");
            return Err(StatusCode::CONFLICT.into());
        }
        self.check_locked(ctx, req, path, false)?;

        let existing = match self.resolve(ctx, path).await {
            Ok(Resource::File(file)) => Some(file),
            Ok(Resource::Folder(_)) => {
                debug!("PUT over folder {path}");
                return Err(StatusCode::CONFLICT.into());
            }
            Err(FsError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let failed = match &existing {
            Some(file) => {
                let etag = file.etag();
                let validators = Validators {
                    etag: &etag,
                    last_modified: file.current_body.audit.modification_date,
                    length: file.current_body.file_size,
                    collection: false,
                };
                check_preconditions(ctx.method, req.headers(), &validators)
            }
            None => check_absent(req.headers()),
        };
        if let Some(n) = failed {
            debug!("PUT {path}: {n:?}");
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }

        let parent = match self.resolve(ctx, &path.parent()).await {
            Ok(Resource::Folder(folder)) => folder,
            Ok(Resource::File(_)) | Err(FsError::NotFound) => {
                debug!("PUT {path}: no parent folder");
                return Err(StatusCode::CONFLICT.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mime = mime_guess::from_path(path.file_name())
            .first_or_octet_stream()
            .to_string();

        let content = match req.headers().get(header::CONTENT_RANGE) {
            Some(value) => {
                let range = value
                    .to_str()
                    .ok()
                    .and_then(PutRange::parse)
                    .ok_or_else(|| DavError::from(StatusCode::BAD_REQUEST))?;
                let old = match &existing {
                    Some(file) => Some(self.store.file_contents(ctx.user(), file.id, None).await?),
                    None => None,
                };
                let staged = self.staging.stage(path, old, range, body).await?;
                debug!("partial PUT {path}: {range:?}, {} bytes staged", staged.len());
                self.upload_stream(ctx, staged.into_stream(self.read_buf_size))
                    .await?
            }
            None => self.upload_body(ctx, body).await?,
        };

        let (status, file) = match existing {
            Some(file) => (
                StatusCode::NO_CONTENT,
                self.store
                    .update_file_contents(ctx.user(), file.id, &mime, content)
                    .await,
            ),
            None => (
                StatusCode::CREATED,
                self.store
                    .create_file(ctx.user(), parent.id, path.file_name(), &mime, content)
                    .await,
            ),
        };
        let file = file.map_err(put_error)?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = status;
        let h = res.headers_mut();
        if let Ok(etag) = HeaderValue::from_str(&file.etag()) {
            h.insert(header::ETAG, etag);
        }
        h.typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
