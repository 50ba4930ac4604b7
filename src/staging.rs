//! Temporary files for partial PUT.
//!
//! A partial PUT (`PUT` with `Content-Range`) is merged with the
//! current content in a temporary file, which is then uploaded to the
//! store as a whole.
use std::error::Error as StdError;
use std::io::{self, SeekFrom};
use std::path::PathBuf;

use async_stream::stream;
use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use http::StatusCode;
use http_body::Body as HttpBody;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::ByteStream;
use crate::DavResult;

/// `Content-Range: bytes start-end/total` of a partial PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PutRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl PutRange {
    /// Parse the header. `None` means the request is malformed.
    pub fn parse(value: &str) -> Option<PutRange> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = rest.split_once('/')?;
        let (start, end) = range.split_once('-')?;
        let start: u64 = start.trim().parse().ok()?;
        let end: u64 = end.trim().parse().ok()?;
        let total: u64 = total.trim().parse().ok()?;
        if total == 0 || start > end {
            return None;
        }
        Some(PutRange {
            start,
            end: std::cmp::min(end, total - 1),
            total,
        })
    }
}

/// Where partial PUTs are merged.
#[derive(Debug, Clone)]
pub(crate) struct StagingArea {
    dir: PathBuf,
}

/// A merged temporary file. Removed when dropped.
#[derive(Debug)]
pub(crate) struct StagedFile {
    path: PathBuf,
    len: u64,
}

impl StagingArea {
    pub fn new(dir: Option<PathBuf>) -> StagingArea {
        StagingArea {
            dir: dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    // Every request gets its own file, so concurrent partial PUTs to
    // one path never write into each other's staging data.
    fn temp_path(&self, path: &DavPath) -> PathBuf {
        let name = format!("dav-store.{}.{}", path.staging_key(), Uuid::new_v4().simple());
        self.dir.join(name)
    }

    /// Merge `existing` content with the request body written at
    /// `range.start`, in a file of exactly `range.total` bytes.
    pub async fn stage<ReqBody, ReqData, ReqError>(
        &self,
        path: &DavPath,
        existing: Option<ByteStream>,
        range: PutRange,
        body: ReqBody,
    ) -> DavResult<StagedFile>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let staged = StagedFile {
            path: self.temp_path(path),
            len: range.total,
        };
        trace!("staging {path:?} in {:?}", staged.path);
        let mut file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&staged.path)
            .await?;

        if let Some(mut strm) = existing {
            while let Some(chunk) = strm.next().await {
                file.write_all(&chunk?).await?;
            }
        }
        file.set_len(range.total).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|e| {
                debug!("partial PUT body: {e}");
                DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof"))
            })?;
            while buf.has_remaining() {
                let chunk = buf.chunk();
                let n = chunk.len();
                file.write_all(chunk).await?;
                buf.advance(n);
            }
        }
        file.flush().await?;

        // data past the declared total is not part of the resource.
        let written = file.metadata().await?.len();
        if written != range.total {
            debug!("partial PUT wrote {written} bytes, declared total {}", range.total);
            return Err(StatusCode::BAD_REQUEST.into());
        }
        Ok(staged)
    }
}

impl StagedFile {
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Read the file back. The file is removed once the stream is dropped.
    pub fn into_stream(self, buf_size: usize) -> ByteStream {
        Box::pin(stream! {
            let staged = self;
            match tokio::fs::File::open(&staged.path).await {
                Ok(mut file) => loop {
                    let mut buf = BytesMut::with_capacity(buf_size);
                    match file.read_buf(&mut buf).await {
                        Ok(0) => break,
                        Ok(_) => yield Ok(buf.freeze()),
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                },
                Err(e) => yield Err(e),
            }
            drop(staged);
        })
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("cannot remove staging file {:?}: {e}", self.path);
            }
        }
    }
}
