//! ## Multi-tenant HTTP/Webdav resource engine
//!
//! This crate is a `handler`: it takes a `http::Request`, serves it out of
//! an owner-scoped namespace and produces a `http::Response`. Every user
//! owns one namespace, which is addressed as
//!
//! ```text
//! {prefix}/{owner}/files{path}
//! ```
//!
//! where `prefix` is stripped by the handler (see [`DavBuilder::strip_prefix`]),
//! `owner` is the username of the namespace owner and `path` is the path of
//! a folder or file inside that namespace.
//!
//! The handler implements plain HTTP (GET/HEAD/PUT/DELETE/POST/OPTIONS)
//! with the conditional request headers, byte ranges (single and
//! `multipart/byteranges`) and partial PUT (`PUT` with `Content-Range`),
//! and the Webdav extension methods PROPFIND, MKCOL, COPY, MOVE, LOCK and
//! UNLOCK. Recursive COPY, MOVE and DELETE of folders do not stop at the
//! first failure: they report every failed path in a `207 Multi-Status`.
//!
//! ## Backend interfaces.
//!
//! - the library contains a [HTTP handler][DavHandler].
//! - you supply a [resource store][ResourceStore] that keeps folders,
//!   files, file bodies and permissions. [`MemStore`] is an in-memory
//!   implementation.
//! - you can supply a [locksystem][DavLockSystem]. The default is the
//!   in-memory [`MemLs`], which by default only keeps lock bookkeeping and
//!   never blocks writers (see [`DavBuilder::enforce_locks`]).
//!
//! Authentication is not done by the handler. The caller passes the name
//! of the authenticated user to [`DavHandler::handle_with`]; without one
//! the request is anonymous and can only read resources that are
//! readable for all.
//!
//! ## Example.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use dav_store::{fs::MemStore, DavHandler};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemStore::new();
//!     store.add_user("alice");
//!     let dav_server = DavHandler::builder(Arc::new(store))
//!         .strip_prefix("/dav")
//!         .build();
//!
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle_with(req, Some("alice".to_string())).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving on {:?}", addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multierror;
mod resolver;
mod staging;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod fs;
pub mod ls;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

pub(crate) use crate::errors::DavResult;

pub use crate::davhandler::{DavBuilder, DavHandler};
pub use crate::util::{DavMethod, DavMethodSet};

#[doc(no_inline)]
pub use crate::fs::{MemStore, ResourceStore};
#[doc(no_inline)]
pub use crate::ls::{DavLockSystem, MemLs};
