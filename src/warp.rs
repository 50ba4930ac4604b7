//! Adapter for the `warp` HTTP server framework.
//!
//! The filters in this module will always succeed and never
//! return an error. For example, if a file is not found, the
//! filter will return a 404 reply, and not an internal
//! rejection.
//!
use std::convert::Infallible;

use headers::{authorization::Basic, Authorization, HeaderMapExt};
use http::header::HeaderMap;
use warp::{filters::BoxedFilter, Filter, Reply};

use crate::DavHandler;

/// Reply-filter that runs a DavHandler for anonymous requests.
///
/// Just pass in a pre-configured DavHandler. The prefix is the request
/// path up to this point, so the `/{owner}/files` part must follow.
pub fn dav_handler(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    dav_handler_with(handler, |_| None)
}

/// Reply-filter that takes the principal from a `Authorization: Basic`
/// header. Checking the password is left to an earlier filter.
pub fn dav_handler_basic(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    dav_handler_with(handler, |headers| {
        headers
            .typed_get::<Authorization<Basic>>()
            .map(|Authorization(basic)| basic.username().to_string())
    })
}

/// Reply-filter that runs a DavHandler on behalf of the principal that
/// `principal` finds in the request headers.
pub fn dav_handler_with<F>(handler: DavHandler, principal: F) -> BoxedFilter<(impl Reply,)>
where
    F: Fn(&HeaderMap) -> Option<String> + Clone + Send + Sync + 'static,
{
    use http::uri::Uri;
    use http::{Response, StatusCode};
    use warp::path::{FullPath, Tail};

    warp::method()
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and_then(
            move |method, path_full: FullPath, path_tail: Tail, headers: HeaderMap, body| {
                let handler = handler.clone();
                let principal = principal.clone();

                async move {
                    // rebuild an http::Request struct.
                    let path_str = path_full.as_str();
                    let mut builder = http::Request::builder().method(method);
                    if let Ok(uri) = path_str.parse::<Uri>() {
                        builder = builder.uri(uri);
                    }
                    for (k, v) in headers.iter() {
                        builder = builder.header(k, v);
                    }
                    let request = match builder.body(body) {
                        Ok(request) => request,
                        Err(e) => {
                            debug!("warp: cannot rebuild request {path_str}: {e}");
                            let mut response = Response::new(hyper::Body::empty());
                            *response.status_mut() = StatusCode::BAD_REQUEST;
                            return Ok::<_, Infallible>(response);
                        }
                    };

                    let path_len = path_str.len();
                    let tail_len = path_tail.as_str().len();
                    let prefix = path_str[..path_len - tail_len].to_string();
                    let user = principal(&headers);
                    let response = handler
                        .handle_stream_with(request, Some(prefix), user)
                        .await;

                    // Need to remap the http_body::Body to a hyper::Body.
                    let (parts, body) = response.into_parts();
                    let response = Response::from_parts(parts, hyper::Body::wrap_stream(body));
                    Ok::<_, Infallible>(response)
                }
            },
        )
        .boxed()
}
