//! GET and HEAD. Conditional checks, then the transfer of the whole
//! content, one range, or several ranges as `multipart/byteranges`.
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use headers::HeaderMapExt;
use htmlescape::encode_minimal;
use http::{header, HeaderValue, Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::{negotiate, ByteRange, Negotiation, Validators};
use crate::fs::*;
use crate::util::{systemtime_to_httpdate, DavMethod};
use crate::DavResult;

use super::handle_options::methods_for;
use super::DavContext;

/// Separator of the parts of a `multipart/byteranges` body.
pub(crate) const BOUNDARY: &str = "DAV_STORE_MIME_BOUNDARY";

// Everything needed to (re)open the content of one file body.
#[derive(Clone)]
struct Source {
    store: Arc<dyn ResourceStore>,
    user: UserId,
    file: FileId,
    body: BodyId,
}

impl Source {
    async fn open(&self) -> FsResult<ByteStream> {
        self.store
            .file_contents(self.user, self.file, Some(self.body))
            .await
    }
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Content type of a body, falling back to a guess from the name.
pub(crate) fn content_type(name: &str, mime_type: &str) -> String {
    if mime_type.is_empty() {
        mime_guess::from_path(name)
            .first_or_octet_stream()
            .to_string()
    } else {
        mime_type.to_string()
    }
}

// The value of `?version=N`, if any.
fn version_param(req: &Request<()>) -> DavResult<Option<u32>> {
    let query = match req.uri().query() {
        Some(q) => q,
        None => return Ok(None),
    };
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        if k == "version" {
            return match v.parse::<u32>() {
                Ok(n) => Ok(Some(n)),
                Err(_) => Err(StatusCode::BAD_REQUEST.into()),
            };
        }
    }
    Ok(None)
}

// Header of one part of a multipart/byteranges body.
fn part_header(range: &ByteRange, mime: &str) -> String {
    format!(
        "\r\n--{}\r\nContent-Type: {}\r\nContent-Range: {}\r\n\r\n",
        BOUNDARY,
        mime,
        range.content_range()
    )
}

fn closing_boundary() -> String {
    format!("\r\n--{}--", BOUNDARY)
}

// Skip `start` bytes of a source, then pass on exactly `len` bytes.
fn copy_range(
    src: ByteStream,
    start: u64,
    len: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream! {
        let mut src = src;
        let mut skip = start;
        let mut left = len;
        while left > 0 {
            match src.next().await {
                Some(Ok(mut buf)) => {
                    let n = buf.len() as u64;
                    if skip >= n {
                        skip -= n;
                        continue;
                    }
                    if skip > 0 {
                        buf = buf.slice(skip as usize..);
                        skip = 0;
                    }
                    if buf.len() as u64 > left {
                        buf.truncate(left as usize);
                    }
                    left -= buf.len() as u64;
                    yield Ok(buf);
                }
                Some(Err(e)) => {
                    yield Err(e);
                    break;
                }
                None => {
                    yield Err(io::Error::new(io::ErrorKind::UnexpectedEof, "content shorter than its length"));
                    break;
                }
            }
        }
    }
}

// Every range from a freshly opened source, wrapped in MIME parts.
fn multipart(
    first: ByteStream,
    source: Source,
    parts: Vec<(String, ByteRange)>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream! {
        let mut first = Some(first);
        let mut failed = false;
        for (head, range) in parts {
            yield Ok(Bytes::from(head));
            let src = match first.take() {
                Some(src) => src,
                None => match source.open().await {
                    Ok(src) => src,
                    Err(e) => {
                        yield Err(io::Error::from(e));
                        failed = true;
                        break;
                    }
                },
            };
            let part = copy_range(src, range.start, range.len());
            pin_utils::pin_mut!(part);
            while let Some(item) = part.next().await {
                let err = item.is_err();
                yield item;
                if err {
                    failed = true;
                    break;
                }
            }
            if failed {
                break;
            }
        }
        if !failed {
            yield Ok(Bytes::from(closing_boundary()));
        }
    }
}

// Pass on the transfer, logging an abort. A complete transfer is
// booked on the namespace owner.
fn accounted<S>(
    store: Arc<dyn ResourceStore>,
    owner: UserId,
    src: S,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    stream! {
        let mut sent = 0u64;
        let mut failed = false;
        pin_utils::pin_mut!(src);
        while let Some(item) = src.next().await {
            match item {
                Ok(buf) => {
                    sent += buf.len() as u64;
                    yield Ok(buf);
                }
                Err(e) => {
                    error!("transfer aborted after {sent} bytes: {e}");
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }
        if !failed {
            store.update_accounting(owner, SystemTime::now(), sent);
        }
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
    ) -> DavResult<Response<Body>> {
        let res = self
            .resolve(ctx, &ctx.path)
            .await
            .map_err(|e| ctx.fs_error(e))?;
        self.check_read(ctx, &res).await?;
        match res {
            Resource::Folder(folder) => self.handle_autoindex(ctx, req, &folder).await,
            Resource::File(file) => self.handle_get_file(ctx, req, &file).await,
        }
    }

    async fn handle_get_file(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        file: &FileResource,
    ) -> DavResult<Response<Body>> {
        let body = match version_param(req)? {
            Some(version) => self.store.file_body(ctx.user(), file.id, version).await?,
            None => file.current_body.clone(),
        };
        let etag = body.etag();
        let len = body.file_size;
        let mime = content_type(&file.name, &body.mime_type);
        let validators = Validators {
            etag: &etag,
            last_modified: body.audit.modification_date,
            length: len,
            collection: false,
        };

        let mut res = Response::new(Body::empty());
        {
            let h = res.headers_mut();
            h.insert(header::ETAG, header_value(&etag));
            h.insert(
                header::LAST_MODIFIED,
                header_value(&systemtime_to_httpdate(body.audit.modification_date)),
            );
            h.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        }

        let ranges = match negotiate(ctx.method, req.headers(), &validators) {
            Negotiation::Serve(ranges) => ranges,
            Negotiation::NotModified => {
                *res.status_mut() = StatusCode::NOT_MODIFIED;
                return Ok(res);
            }
            Negotiation::PreconditionFailed => return Err(StatusCode::PRECONDITION_FAILED.into()),
            Negotiation::RangeNotSatisfiable => {
                *res.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
                let h = res.headers_mut();
                h.insert(header::CONTENT_RANGE, header_value(&format!("bytes */{len}")));
                h.typed_insert(headers::ContentLength(0));
                return Ok(res);
            }
        };

        let source = Source {
            store: self.store.clone(),
            user: ctx.user(),
            file: file.id,
            body: body.id,
        };
        let is_head = ctx.method == DavMethod::Head;

        match ranges.as_slice() {
            [] => {
                let h = res.headers_mut();
                h.insert(header::CONTENT_TYPE, header_value(&mime));
                h.typed_insert(headers::ContentLength(len));
                if !is_head && len > 0 {
                    let src = source.open().await?;
                    *res.body_mut() = Body::stream(accounted(
                        self.store.clone(),
                        ctx.owner.id,
                        copy_range(src, 0, len),
                    ));
                }
            }
            [range] => {
                debug!("serving {} of {}", range.content_range(), ctx.path);
                *res.status_mut() = StatusCode::PARTIAL_CONTENT;
                let h = res.headers_mut();
                h.insert(header::CONTENT_TYPE, header_value(&mime));
                h.insert(header::CONTENT_RANGE, header_value(&range.content_range()));
                h.typed_insert(headers::ContentLength(range.len()));
                if !is_head {
                    let src = source.open().await?;
                    *res.body_mut() = Body::stream(accounted(
                        self.store.clone(),
                        ctx.owner.id,
                        copy_range(src, range.start, range.len()),
                    ));
                }
            }
            _ => {
                debug!("serving {} ranges of {}", ranges.len(), ctx.path);
                let parts: Vec<(String, ByteRange)> = ranges
                    .iter()
                    .map(|r| (part_header(r, &mime), *r))
                    .collect();
                let total = parts
                    .iter()
                    .map(|(head, r)| head.len() as u64 + r.len())
                    .sum::<u64>()
                    + closing_boundary().len() as u64;
                *res.status_mut() = StatusCode::PARTIAL_CONTENT;
                let h = res.headers_mut();
                h.insert(
                    header::CONTENT_TYPE,
                    header_value(&format!("multipart/byteranges; boundary={BOUNDARY}")),
                );
                h.typed_insert(headers::ContentLength(total));
                if !is_head {
                    let first = source.open().await?;
                    *res.body_mut() = Body::stream(accounted(
                        self.store.clone(),
                        ctx.owner.id,
                        multipart(first, source, parts),
                    ));
                }
            }
        }
        Ok(res)
    }

    async fn handle_autoindex(
        &self,
        ctx: &DavContext,
        req: &Request<()>,
        folder: &FolderResource,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        if !self.autoindex {
            *res.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            let allow = self.allow_header(&methods_for(Some(&Resource::Folder(folder.clone()))));
            res.headers_mut().insert(header::ALLOW, allow);
            return Ok(res);
        }

        let validators = Validators {
            etag: "",
            last_modified: folder.audit.modification_date,
            length: 0,
            collection: true,
        };
        res.headers_mut().insert(
            header::LAST_MODIFIED,
            header_value(&systemtime_to_httpdate(folder.audit.modification_date)),
        );
        match negotiate(ctx.method, req.headers(), &validators) {
            Negotiation::NotModified => {
                *res.status_mut() = StatusCode::NOT_MODIFIED;
                return Ok(res);
            }
            Negotiation::PreconditionFailed => return Err(StatusCode::PRECONDITION_FAILED.into()),
            _ => {}
        }

        let files = self
            .store
            .child_files(ctx.user(), folder.id, false)
            .await?;

        let title = encode_minimal(ctx.path.as_str());
        let mut w = String::new();
        let _ = write!(
            w,
            "<html><head>\n<title>Index of {title}</title>\n</head><body>\n\
             <h1>Index of {title}</h1>\n<table>\n\
             <tr><th>Name</th><th>Last modified</th><th>Size</th></tr>\n"
        );
        if !folder.path.is_root() {
            let parent = folder.path.without_slash().parent();
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">Parent Directory</a></td><td>&nbsp;</td><td>-</td></tr>",
                encode_minimal(&ctx.ns.href(&parent))
            );
        }
        for sub in &folder.subfolders {
            let mut path = sub.path.clone();
            path.add_slash();
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">{}/</a></td><td>&nbsp;</td><td>-</td></tr>",
                encode_minimal(&ctx.ns.href(&path)),
                encode_minimal(&sub.name)
            );
        }
        for file in &files {
            let _ = writeln!(
                w,
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                encode_minimal(&ctx.ns.href(&file.path)),
                encode_minimal(&file.name),
                systemtime_to_httpdate(file.current_body.audit.modification_date),
                file.current_body.file_size
            );
        }
        w.push_str("</table>\n</body></html>\n");

        let h = res.headers_mut();
        h.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        h.typed_insert(headers::ContentLength(w.len() as u64));
        if ctx.method == DavMethod::Get {
            *res.body_mut() = Body::from(w);
        }
        Ok(res)
    }
}
