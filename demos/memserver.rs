//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Serves an in-memory store. Every `--user` gets an empty namespace at
//  http://localhost:4918/{prefix}/{user}/files/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use futures_util::future::TryFutureExt;
use headers::{authorization::Basic, Authorization, HeaderMapExt};

use dav_store::{body::Body, fs::MemStore, DavHandler};

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
}

impl Server {
    pub fn new(store: MemStore, prefix: String, enforce_locks: bool, auth: bool) -> Self {
        let dh = DavHandler::builder(Arc::new(store))
            .strip_prefix(prefix)
            .enforce_locks(enforce_locks)
            .build();
        Server { dh, auth }
    }

    async fn handle(
        &self,
        req: hyper::Request<hyper::Body>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        // the username of basic auth is the principal. no passwords here.
        let user = match req.headers().typed_get::<Authorization<Basic>>() {
            Some(Authorization(basic)) => Some(basic.username().to_string()),
            None if self.auth => {
                let mut response = hyper::Response::new(Body::from("please auth"));
                *response.status_mut() = hyper::StatusCode::UNAUTHORIZED;
                response.headers_mut().insert(
                    "WWW-Authenticate",
                    hyper::header::HeaderValue::from_static("Basic realm=\"dav-store\""),
                );
                return Ok(response);
            }
            None => None,
        };
        Ok(self.dh.handle_with(req, user).await)
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// path prefix in front of /{user}/files
    #[arg(long, default_value = "")]
    prefix: String,
    /// create a user (may be repeated)
    #[arg(short, long = "user", default_value = "guest")]
    users: Vec<String>,
    /// refuse writes to locked resources
    #[arg(short = 'l', long)]
    enforce_locks: bool,
    /// require basic authentication
    #[arg(short, long)]
    auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let Cli {
        port,
        prefix,
        users,
        enforce_locks,
        auth,
    } = Cli::parse();

    let store = MemStore::new();
    for user in &users {
        store.add_user(user);
    }

    let dav_server = Server::new(store, prefix.clone(), enforce_locks, auth);
    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { dav_server.handle(req).await }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = format!("0.0.0.0:{}", port);
    let addr = SocketAddr::from_str(&addr)?;

    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    for user in &users {
        println!("Serving {user} on http://localhost:{port}{prefix}/{user}/files/");
    }
    let _ = server.await;
    Ok(())
}
