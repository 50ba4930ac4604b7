//! Response body, and an adapter for `Stream` request bodies.

use std::error::Error as StdError;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

use pin_project::pin_project;

/// Body returned by the handler. Implements both `Stream` and
/// `http_body::Body`.
///
/// Small bodies (XML documents, errors) are kept in memory, file content
/// is streamed.
pub struct Body {
    pub(crate) inner: BodyType,
}

pub(crate) enum BodyType {
    Bytes(Option<Bytes>),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body {
            inner: BodyType::Bytes(None),
        }
    }

    /// A body that produces the items of `stream`.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            inner: BodyType::Stream(Box::pin(stream)),
        }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            BodyType::Bytes(bytes) => Poll::Ready(bytes.take().filter(|b| !b.is_empty()).map(Ok)),
            BodyType::Stream(stream) => stream.as_mut().poll_next(cx),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, BodyType::Bytes(None))
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            BodyType::Bytes(Some(b)) => SizeHint::with_exact(b.len() as u64),
            BodyType::Bytes(None) => SizeHint::with_exact(0),
            BodyType::Stream(_) => SizeHint::default(),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body::from(Bytes::from(t))
    }
}

impl From<&'static str> for Body {
    fn from(t: &'static str) -> Body {
        Body::from(Bytes::from_static(t.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body::from(Bytes::from(t))
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body {
            inner: BodyType::Bytes(Some(t)),
        }
    }
}

// Wraps a Stream of buffers so it can be handled like any http_body::Body.
#[pin_project]
pub(crate) struct StreamBody<B> {
    #[pin]
    body: B,
}

impl<ReqBody, ReqData, ReqError> HttpBody for StreamBody<ReqBody>
where
    ReqData: Buf + Send,
    ReqError: StdError + Send + Sync + 'static,
    ReqBody: Stream<Item = Result<ReqData, ReqError>>,
{
    type Data = ReqData;
    type Error = ReqError;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        self.project().body.poll_next(cx)
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        _cx: &mut Context,
    ) -> Poll<Result<Option<HeaderMap>, Self::Error>> {
        Poll::Ready(Ok(None))
    }
}

impl<B> StreamBody<B> {
    pub fn new(body: B) -> StreamBody<B> {
        StreamBody { body }
    }
}
