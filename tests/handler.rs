use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{Request, Response, StatusCode};

use dav_store::body::Body;
use dav_store::davpath::DavPath;
use dav_store::fs::{MemStore, Permissions, UserId};
use dav_store::DavHandler;

struct Setup {
    store: MemStore,
    alice: UserId,
    bob: UserId,
    dav: DavHandler,
}

fn setup() -> Setup {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = MemStore::new();
    let alice = store.add_user("alice");
    let bob = store.add_user("bob");
    store
        .put_file(alice, &p("/a.txt"), "text/plain", "0123456789")
        .unwrap();
    let dav = DavHandler::builder(Arc::new(store.clone()))
        .strip_prefix("/dav")
        .build();
    Setup {
        store,
        alice,
        bob,
        dav,
    }
}

fn p(s: &str) -> DavPath {
    DavPath::new(s).unwrap()
}

fn url(path: &str) -> String {
    format!("/dav/alice/files{path}")
}

fn req(method: &str, path: &str) -> http::request::Builder {
    Request::builder().method(method).uri(url(path))
}

async fn send(s: &Setup, req: Request<Body>, user: Option<&str>) -> Response<Body> {
    s.dav.handle_with(req, user.map(|u| u.to_string())).await
}

async fn alice(s: &Setup, req: Request<Body>) -> Response<Body> {
    send(s, req, Some("alice")).await
}

async fn body_of(resp: Response<Body>) -> Bytes {
    let chunks: Vec<Bytes> = resp.into_body().try_collect().await.unwrap();
    Bytes::from(chunks.concat())
}

fn header<'a>(resp: &'a Response<Body>, name: &str) -> &'a str {
    resp.headers()
        .get(name)
        .map(|v| v.to_str().unwrap())
        .unwrap_or("")
}

const LOCKINFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:alice@example.com</D:href></D:owner>
</D:lockinfo>"#;

#[tokio::test]
async fn get_full_and_single_range() {
    let s = setup();

    let resp = alice(&s, req("GET", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-length"), "10");
    assert_eq!(header(&resp, "accept-ranges"), "bytes");
    assert!(header(&resp, "etag").starts_with("\"10-"));
    assert_eq!(body_of(resp).await, "0123456789");

    let resp = alice(
        &s,
        req("GET", "/a.txt")
            .header("Range", "bytes=2-5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, "content-range"), "bytes 2-5/10");
    assert_eq!(header(&resp, "content-length"), "4");
    assert_eq!(body_of(resp).await, "2345");

    // the whole body and the range were both charged to alice.
    let acct = s.store.accounting();
    assert_eq!(acct.len(), 2);
    assert_eq!(acct[0].owner, s.alice);
    assert_eq!(acct[0].bytes, 10);
    assert_eq!(acct[1].bytes, 4);
}

#[tokio::test]
async fn head_has_headers_only() {
    let s = setup();
    let resp = alice(&s, req("HEAD", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "content-length"), "10");
    assert!(body_of(resp).await.is_empty());
}

#[tokio::test]
async fn malformed_range_is_unsatisfiable() {
    let s = setup();
    for range in ["bytes=abc", "bytes=20-30", "bytes=5-2"] {
        let resp = alice(
            &s,
            req("GET", "/a.txt")
                .header("Range", range)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{range}");
        assert_eq!(header(&resp, "content-range"), "bytes */10");
    }
}

#[tokio::test]
async fn multipart_byteranges() {
    let s = setup();
    let resp = alice(
        &s,
        req("GET", "/a.txt")
            .header("Range", "bytes=0-1,8-")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header(&resp, "content-type"),
        "multipart/byteranges; boundary=DAV_STORE_MIME_BOUNDARY"
    );
    let length: usize = header(&resp, "content-length").parse().unwrap();
    let body = body_of(resp).await;
    assert_eq!(body.len(), length);

    let expected = "\r\n--DAV_STORE_MIME_BOUNDARY\r\n\
                    Content-Type: text/plain\r\n\
                    Content-Range: bytes 0-1/10\r\n\r\n01\
                    \r\n--DAV_STORE_MIME_BOUNDARY\r\n\
                    Content-Type: text/plain\r\n\
                    Content-Range: bytes 8-9/10\r\n\r\n89\
                    \r\n--DAV_STORE_MIME_BOUNDARY--";
    assert_eq!(std::str::from_utf8(&body).unwrap(), expected);
}

#[tokio::test]
async fn if_none_match_star() {
    let s = setup();
    let resp = alice(
        &s,
        req("GET", "/a.txt")
            .header("If-None-Match", "*")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);

    let resp = alice(
        &s,
        req("PUT", "/a.txt")
            .header("If-None-Match", "*")
            .body(Body::from("replaced"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(s.store.contents(s.alice, &p("/a.txt")).unwrap(), "0123456789");
}

#[tokio::test]
async fn if_match_etag() {
    let s = setup();
    let resp = alice(&s, req("HEAD", "/a.txt").body(Body::empty()).unwrap()).await;
    let etag = header(&resp, "etag").to_string();

    let resp = alice(
        &s,
        req("PUT", "/a.txt")
            .header("If-Match", "\"0-0\"")
            .body(Body::from("nope"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let resp = alice(
        &s,
        req("PUT", "/a.txt")
            .header("If-Match", etag.as_str())
            .body(Body::from("yes"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(s.store.contents(s.alice, &p("/a.txt")).unwrap(), "yes");
}

#[tokio::test]
async fn put_create_replace_conflict() {
    let s = setup();

    let resp = alice(&s, req("PUT", "/new.txt").body(Body::from("hello")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(header(&resp, "etag").starts_with("\"5-"));
    assert_eq!(s.store.contents(s.alice, &p("/new.txt")).unwrap(), "hello");

    let resp = alice(&s, req("PUT", "/new.txt").body(Body::from("bye")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(s.store.contents(s.alice, &p("/new.txt")).unwrap(), "bye");

    let resp = alice(&s, req("PUT", "/nodir/x.txt").body(Body::from("x")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    s.store.mkdir_all(s.alice, &p("/dir")).unwrap();
    let resp = alice(&s, req("PUT", "/dir").body(Body::from("x")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn partial_put() {
    let s = setup();

    let resp = alice(
        &s,
        req("PUT", "/a.txt")
            .header("Content-Range", "bytes 2-4/10")
            .body(Body::from("abc"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(s.store.contents(s.alice, &p("/a.txt")).unwrap(), "01abc56789");

    let resp = alice(
        &s,
        req("PUT", "/a.txt")
            .header("Content-Range", "bytes 4-2/10")
            .body(Body::from("abc"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn partial_put_long_path() {
    let s = setup();
    let dir = format!("/{}/{}", "a".repeat(150), "b".repeat(150));
    s.store.mkdir_all(s.alice, &p(&dir)).unwrap();
    let file = format!("{dir}/f.txt");
    s.store
        .put_file(s.alice, &p(&file), "text/plain", "0123456789")
        .unwrap();

    let resp = alice(
        &s,
        req("PUT", &file)
            .header("Content-Range", "bytes 2-4/10")
            .body(Body::from("abc"))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(s.store.contents(s.alice, &p(&file)).unwrap(), "01abc56789");
}

#[tokio::test]
async fn mkcol() {
    let s = setup();

    let resp = alice(&s, req("MKCOL", "/sub").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(s.store.exists(s.alice, &p("/sub")));

    let resp = alice(&s, req("MKCOL", "/sub").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // a file in the way.
    let resp = alice(&s, req("MKCOL", "/a.txt/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = header(&resp, "allow");
    for m in ["GET", "DELETE", "HEAD"] {
        assert!(allow.contains(m), "{allow}");
    }

    let resp = alice(&s, req("MKCOL", "/x/y").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = alice(&s, req("MKCOL", "/a.txt/y").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = alice(&s, req("MKCOL", "/withbody").body(Body::from("<x/>")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);

    let resp = alice(&s, req("MKCOL", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = header(&resp, "allow");
    assert!(allow.contains("PROPFIND") && !allow.contains("MKCOL"), "{allow}");
}

#[tokio::test]
async fn lock_then_unlock() {
    let s = setup();

    let resp = alice(
        &s,
        req("LOCK", "/a.txt")
            .header("Timeout", "Second-600")
            .body(Body::from(LOCKINFO))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = header(&resp, "lock-token").to_string();
    assert!(token.starts_with("<opaquelocktoken:"), "{token}");
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(xml.contains("<D:timeout>Second-600</D:timeout>"), "{xml}");
    assert!(xml.contains("mailto:alice@example.com"), "{xml}");

    // refresh with the token in the If header.
    let resp = alice(
        &s,
        req("LOCK", "/a.txt")
            .header("If", format!("({token})"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = alice(
        &s,
        req("UNLOCK", "/a.txt")
            .header("Lock-Token", token.as_str())
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // the lock is gone, so it can't be refreshed anymore.
    let resp = alice(
        &s,
        req("LOCK", "/a.txt")
            .header("If", format!("({token})"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let resp = alice(&s, req("LOCK", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enforced_locks() {
    let s = setup();
    let dav = DavHandler::builder(Arc::new(s.store.clone()))
        .strip_prefix("/dav")
        .enforce_locks(true)
        .build();

    let resp = dav
        .handle_with(
            req("LOCK", "/a.txt").body(Body::from(LOCKINFO)).unwrap(),
            Some("alice".to_string()),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = header(&resp, "lock-token").to_string();

    let resp = dav
        .handle_with(
            req("PUT", "/a.txt").body(Body::from("x")).unwrap(),
            Some("alice".to_string()),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let resp = dav
        .handle_with(
            req("PUT", "/a.txt")
                .header("If", format!("({token})"))
                .body(Body::from("x"))
                .unwrap(),
            Some("alice".to_string()),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = dav
        .handle_with(
            req("LOCK", "/a.txt").body(Body::from(LOCKINFO)).unwrap(),
            Some("alice".to_string()),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn move_with_overwrite() {
    let s = setup();
    s.store
        .put_file(s.alice, &p("/b.txt"), "text/plain", "old")
        .unwrap();

    let resp = alice(
        &s,
        req("MOVE", "/a.txt")
            .header("Destination", "http://localhost/dav/alice/files/b.txt")
            .header("Overwrite", "T")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!s.store.exists(s.alice, &p("/a.txt")));
    assert_eq!(s.store.contents(s.alice, &p("/b.txt")).unwrap(), "0123456789");

    let resp = alice(
        &s,
        req("MOVE", "/b.txt")
            .header("Destination", "/dav/alice/files/c.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(s.store.exists(s.alice, &p("/c.txt")));
}

#[tokio::test]
async fn copy_without_overwrite_changes_nothing() {
    let s = setup();
    s.store
        .put_file(s.alice, &p("/b.txt"), "text/plain", "old")
        .unwrap();
    let before = s.store.node_count();

    let resp = alice(
        &s,
        req("COPY", "/a.txt")
            .header("Destination", "/dav/alice/files/b.txt")
            .header("Overwrite", "F")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(s.store.node_count(), before);
    assert_eq!(s.store.contents(s.alice, &p("/b.txt")).unwrap(), "old");
}

#[tokio::test]
async fn copy_folder_tree() {
    let s = setup();
    s.store.put_file(s.alice, &p("/src/x.txt"), "text/plain", "x").unwrap();
    s.store.put_file(s.alice, &p("/src/deep/y.txt"), "text/plain", "y").unwrap();

    let resp = alice(
        &s,
        req("COPY", "/src/")
            .header("Destination", "/dav/alice/files/dst/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(s.store.contents(s.alice, &p("/dst/x.txt")).unwrap(), "x");
    assert_eq!(s.store.contents(s.alice, &p("/dst/deep/y.txt")).unwrap(), "y");
    assert!(s.store.exists(s.alice, &p("/src/deep/y.txt")));

    // into itself.
    let resp = alice(
        &s,
        req("COPY", "/src/")
            .header("Destination", "/dav/alice/files/src/deep/again")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // outside the files namespace.
    let resp = alice(
        &s,
        req("COPY", "/a.txt")
            .header("Destination", "/dav/alice/trash/a.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn copy_and_move_report_failed_children() {
    let s = setup();
    s.store.put_file(s.alice, &p("/src/small.txt"), "text/plain", "x").unwrap();
    s.store
        .put_file(s.alice, &p("/src/big.txt"), "text/plain", "0123456789AB")
        .unwrap();
    // room for one more small file, not for the big one.
    s.store.set_quota(s.alice, 25);

    let resp = alice(
        &s,
        req("COPY", "/src/")
            .header("Destination", "/dav/alice/files/dst/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(
        xml.contains("<D:href>/dav/alice/files/src/big.txt</D:href><D:status>HTTP/1.1 413 Payload Too Large</D:status>"),
        "{xml}"
    );
    assert!(!xml.contains("small.txt"), "{xml}");
    assert!(s.store.exists(s.alice, &p("/dst/small.txt")));
    assert!(!s.store.exists(s.alice, &p("/dst/big.txt")));

    let resp = alice(
        &s,
        req("MOVE", "/src/")
            .header("Destination", "/dav/alice/files/moved/")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(xml.contains("<D:href>/dav/alice/files/src/big.txt</D:href>"), "{xml}");

    // the source is left alone when the copy step failed.
    assert_eq!(s.store.contents(s.alice, &p("/src/big.txt")).unwrap(), "0123456789AB");
    assert!(s.store.exists(s.alice, &p("/src/small.txt")));
}

#[tokio::test]
async fn overwrite_failure_in_other_namespace() {
    let s = setup();
    s.store.put_file(s.bob, &p("/dir/x.txt"), "text/plain", "x").unwrap();
    s.store
        .set_permissions(s.bob, &p("/dir"), s.alice, Permissions::all())
        .unwrap();
    s.store
        .set_permissions(s.bob, &p("/dir/x.txt"), s.alice, Permissions::read_only())
        .unwrap();

    let resp = alice(
        &s,
        req("COPY", "/a.txt")
            .header("Destination", "/dav/bob/files/dir")
            .header("Overwrite", "T")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(
        xml.contains("<D:href>/dav/bob/files/dir/x.txt</D:href><D:status>HTTP/1.1 403 Forbidden</D:status>"),
        "{xml}"
    );
    assert!(!xml.contains("/dav/alice/"), "{xml}");
    assert!(s.store.exists(s.bob, &p("/dir/x.txt")));
}

#[tokio::test]
async fn delete_reports_partial_failure() {
    let s = setup();
    s.store.put_file(s.alice, &p("/dir/keep.txt"), "text/plain", "k").unwrap();
    s.store.put_file(s.alice, &p("/dir/gone.txt"), "text/plain", "g").unwrap();
    s.store
        .set_permissions(s.alice, &p("/dir"), s.bob, Permissions::all())
        .unwrap();
    s.store
        .set_permissions(s.alice, &p("/dir/keep.txt"), s.bob, Permissions::read_only())
        .unwrap();

    let resp = send(&s, req("DELETE", "/dir/").body(Body::empty()).unwrap(), Some("bob")).await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(
        xml.contains("<D:href>/dav/alice/files/dir/keep.txt</D:href><D:status>HTTP/1.1 403 Forbidden</D:status>"),
        "{xml}"
    );
    assert!(!xml.contains("gone.txt"), "{xml}");

    assert!(s.store.exists(s.alice, &p("/dir/keep.txt")));
    assert!(!s.store.exists(s.alice, &p("/dir/gone.txt")));
    assert!(s.store.exists(s.alice, &p("/dir")));

    let resp = alice(&s, req("DELETE", "/dir/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(!s.store.exists(s.alice, &p("/dir")));

    let resp = alice(&s, req("DELETE", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn delete_file_without_permission() {
    let s = setup();
    s.store
        .set_permissions(s.alice, &p("/a.txt"), s.bob, Permissions::read_only())
        .unwrap();
    let resp = send(&s, req("DELETE", "/a.txt").body(Body::empty()).unwrap(), Some("bob")).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    let resp = alice(&s, req("DELETE", "/nothere.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn anonymous_access() {
    let s = setup();
    s.store.put_file(s.alice, &p("/pub.txt"), "text/plain", "public").unwrap();
    s.store.set_read_for_all(s.alice, &p("/pub.txt"), true).unwrap();

    let resp = send(&s, req("GET", "/pub.txt").body(Body::empty()).unwrap(), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_of(resp).await, "public");

    // private, missing, and any write all look the same.
    let resp = send(&s, req("GET", "/a.txt").body(Body::empty()).unwrap(), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = send(&s, req("GET", "/missing.txt").body(Body::empty()).unwrap(), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = send(&s, req("PUT", "/pub.txt").body(Body::from("x")).unwrap(), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = send(
        &s,
        Request::get("/dav/nobody/files/x").body(Body::empty()).unwrap(),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn other_users_namespace() {
    let s = setup();
    let resp = send(&s, req("GET", "/a.txt").body(Body::empty()).unwrap(), Some("bob")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    s.store
        .set_permissions(s.alice, &p("/a.txt"), s.bob, Permissions::read_only())
        .unwrap();
    let resp = send(&s, req("GET", "/a.txt").body(Body::empty()).unwrap(), Some("bob")).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&s, req("GET", "/a.txt").body(Body::empty()).unwrap(), Some("mallory")).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reserved_paths() {
    let s = setup();
    let resp = alice(&s, req("GET", "/WEB-INF/web.xml").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = alice(&s, req("MKCOL", "/meta-inf").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = alice(&s, req("PUT", "/WEB-INFO.txt").body(Body::from("x")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn propfind_depth_one() {
    let s = setup();
    s.store.mkdir_all(s.alice, &p("/sub")).unwrap();

    let resp = alice(
        &s,
        req("PROPFIND", "/")
            .header("Depth", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(xml.contains("<D:href>/dav/alice/files/</D:href>"), "{xml}");
    assert!(xml.contains("<D:href>/dav/alice/files/sub/</D:href>"), "{xml}");
    assert!(xml.contains("<D:href>/dav/alice/files/a.txt</D:href>"), "{xml}");
    assert!(xml.contains("<D:getcontentlength>10</D:getcontentlength>"), "{xml}");

    let resp = alice(
        &s,
        req("PROPFIND", "/a.txt")
            .header("Depth", "0")
            .body(Body::from(
                r#"<?xml version="1.0"?><D:propfind xmlns:D="DAV:"><D:prop><D:getetag/><D:quota/></D:prop></D:propfind>"#,
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = body_of(resp).await;
    let xml = std::str::from_utf8(&body).unwrap();
    assert!(xml.contains("<D:getetag>"), "{xml}");
    assert!(xml.contains("HTTP/1.1 404 Not Found"), "{xml}");
    assert!(!xml.contains("getcontentlength"), "{xml}");
}

#[tokio::test]
async fn proppatch_not_implemented() {
    let s = setup();
    let resp = alice(&s, req("PROPPATCH", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn options() {
    let s = setup();
    let resp = alice(&s, req("OPTIONS", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, "dav"), "1,2");
    assert_eq!(header(&resp, "ms-author-via"), "DAV");
    assert!(header(&resp, "allow").contains("PUT"));

    let resp = alice(&s, req("OPTIONS", "/nothere").body(Body::empty()).unwrap()).await;
    assert_eq!(header(&resp, "allow"), "OPTIONS, MKCOL, PUT, LOCK");

    let resp = send(&s, Request::options("/dav/").body(Body::empty()).unwrap(), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(header(&resp, "allow").contains("PROPFIND"));

    let resp = alice(&s, req("BREW", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(header(&resp, "allow").contains("GET"));
}

#[tokio::test]
async fn post_trash_restore_move() {
    let s = setup();

    let resp = alice(&s, req("POST", "/a.txt?trash").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!s.store.exists(s.alice, &p("/a.txt")));

    let resp = alice(&s, req("GET", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = alice(&s, req("POST", "/a.txt?restore").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(s.store.exists(s.alice, &p("/a.txt")));

    s.store.put_file(s.alice, &p("/b.txt"), "text/plain", "b").unwrap();
    let resp = alice(
        &s,
        req("POST", "/a.txt?moveTo=%2Fdav%2Falice%2Ffiles%2Fb.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = alice(
        &s,
        req("POST", "/a.txt?moveTo=%2Fdav%2Falice%2Ffiles%2Fc.txt")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(s.store.contents(s.alice, &p("/c.txt")).unwrap(), "0123456789");

    let resp = alice(&s, req("POST", "/c.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn post_into_own_subtree() {
    let s = setup();
    s.store.mkdir_all(s.alice, &p("/src/sub")).unwrap();
    let before = s.store.node_count();

    for op in ["copyTo", "moveTo"] {
        let resp = alice(
            &s,
            req("POST", &format!("/src?{op}=%2Fdav%2Falice%2Ffiles%2Fsrc%2Fsub%2Fx"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{op}");
    }
    assert_eq!(s.store.node_count(), before);
    assert!(s.store.exists(s.alice, &p("/src/sub")));
}

#[tokio::test]
async fn get_folder_index() {
    let s = setup();
    let resp = alice(&s, req("GET", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_of(resp).await;
    let html = std::str::from_utf8(&body).unwrap();
    assert!(html.contains("/dav/alice/files/a.txt"), "{html}");
}

#[tokio::test]
async fn get_old_version() {
    let s = setup();
    s.store.set_versioned(s.alice, &p("/a.txt"), true).unwrap();
    let resp = alice(&s, req("PUT", "/a.txt").body(Body::from("v2")).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = alice(&s, req("GET", "/a.txt?version=1").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_of(resp).await, "0123456789");

    let resp = alice(&s, req("GET", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(body_of(resp).await, "v2");
}
