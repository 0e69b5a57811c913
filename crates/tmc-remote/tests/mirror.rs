//! HttpRepo against an in-process HTTP server serving a published catalog.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tmc_model::{
    compute_digest, derive_id, with_id, AttachmentContainerRef, CancelToken, ImportOptions, Index,
    NotFoundKind, RepoError, RepoSpec, Repository, SearchParams, ThingModel, TmId,
};
use tmc_remote::{HttpCache, HttpRepo, RemoteConfig};

const TM: &str = r#"{"schema:author":{"name":"a-corp"},"schema:manufacturer":{"name":"eagle"},"schema:mpn":"BT2000","version":{"model":"v1.0.0"}}"#;
const ETAG: &str = "\"toc-1\"";

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    headers: HashMap<String, String>,
}

struct MockServer {
    addr: String,
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl MockServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let routes: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
        let requests: Arc<Mutex<Vec<Captured>>> = Arc::new(Mutex::new(Vec::new()));

        let routes_clone = Arc::clone(&routes);
        let requests_clone = Arc::clone(&requests);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let routes = Arc::clone(&routes_clone);
                let reqs = Arc::clone(&requests_clone);
                std::thread::spawn(move || {
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).is_err() {
                        return;
                    }
                    let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                    if parts.len() < 2 {
                        return;
                    }
                    let path = parts[1].to_owned();
                    let mut headers = HashMap::new();
                    let mut content_length = 0usize;
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                            break;
                        }
                        if let Some((k, v)) = line.trim().split_once(": ") {
                            if k.eq_ignore_ascii_case("content-length") {
                                content_length = v.parse().unwrap_or(0);
                            }
                            headers.insert(k.to_lowercase(), v.to_owned());
                        }
                    }
                    let mut body = vec![0u8; content_length];
                    if content_length > 0 {
                        let _ = reader.read_exact(&mut body);
                    }

                    let not_modified = headers.get("if-none-match").map(String::as_str) == Some(ETAG);
                    reqs.lock().unwrap().push(Captured {
                        path: path.clone(),
                        headers,
                    });

                    let data = routes.lock().unwrap().get(&path).cloned();
                    let head = match (&data, not_modified) {
                        (Some(_), true) => {
                            format!("HTTP/1.1 304 Not Modified\r\nETag: {ETAG}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        }
                        (Some(d), false) => format!(
                            "HTTP/1.1 200 OK\r\nETag: {ETAG}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            d.len()
                        ),
                        (None, _) => {
                            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                                .to_owned()
                        }
                    };
                    let _ = stream.write_all(head.as_bytes());
                    if let (Some(d), false) = (data, not_modified) {
                        let _ = stream.write_all(&d);
                    }
                    let _ = stream.flush();
                });
            }
        });
        MockServer {
            addr,
            routes,
            requests,
        }
    }

    fn serve(&self, path: &str, body: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_owned(), body.to_vec());
    }

    fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    fn captured(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

/// Publish one TM plus a name-level attachment under `prefix` and return its id.
fn publish(server: &MockServer, prefix: &str) -> TmId {
    let (hash, _) = compute_digest(TM.as_bytes()).unwrap();
    let tm = ThingModel::from_bytes(TM.as_bytes()).unwrap();
    let now = chrono::DateTime::parse_from_rfc3339("2024-01-08T14:01:17Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let id = derive_id(&tm, "", now, &hash).unwrap();
    let raw = with_id(TM.as_bytes(), &id.to_string()).unwrap();

    let mut idx = Index::new();
    idx.insert(&ThingModel::from_bytes(&raw).unwrap()).unwrap();
    idx.insert_attachments(
        &AttachmentContainerRef::TmName(id.name()),
        vec![tmc_model::Attachment::guessed("README.md")],
    )
    .unwrap();

    server.serve(
        &format!("{prefix}/.tmc/tm-catalog.toc.json"),
        &serde_json::to_vec(&idx).unwrap(),
    );
    server.serve(&format!("{prefix}/{id}"), &raw);
    server.serve(
        &format!("{prefix}/{}/.attachments/README.md", id.name()),
        b"# BT2000",
    );
    id
}

fn repo(server: &MockServer, loc_suffix: &str, cache_dir: &std::path::Path) -> HttpRepo {
    HttpRepo::new(
        RepoSpec::from_name("mirror"),
        RemoteConfig::new(&format!("{}{loc_suffix}", server.addr)).with_bearer("t0ken"),
        Arc::new(HttpCache::new(cache_dir)),
    )
    .unwrap()
}

#[test]
fn lists_and_fetches_from_published_directory() {
    let server = MockServer::start();
    let id = publish(&server, "/catalog");
    let cache = tempfile::tempdir().unwrap();
    let repo = repo(&server, "/catalog/", cache.path());
    let ctx = CancelToken::new();

    let result = repo.list(&ctx, &SearchParams::default()).unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].name, "a-corp/eagle/BT2000");
    assert_eq!(result.entries[0].versions[0].found_in, "mirror");

    let (served, body) = repo.fetch(&ctx, &id.to_string()).unwrap();
    assert_eq!(served, id.to_string());
    assert_eq!(ThingModel::from_bytes(&body).unwrap().id, Some(id.to_string()));

    let readme = repo
        .fetch_attachment(&ctx, &AttachmentContainerRef::TmName(id.name()), "README.md")
        .unwrap();
    assert_eq!(readme, b"# BT2000");

    let auth_ok = server
        .captured()
        .iter()
        .all(|r| r.headers.get("authorization").map(String::as_str) == Some("Bearer t0ken"));
    assert!(auth_ok, "every request carries the bearer token");
}

#[test]
fn digest_equivalent_id_is_served() {
    let server = MockServer::start();
    let id = publish(&server, "");
    let cache = tempfile::tempdir().unwrap();
    let repo = repo(&server, "", cache.path());

    let newer = id
        .to_string()
        .replace("20240108140117", "20250101000000");
    let (served, _) = repo.fetch(&CancelToken::new(), &newer).unwrap();
    assert_eq!(served, id.to_string());
}

#[test]
fn missing_files_map_to_typed_not_found() {
    let server = MockServer::start();
    let id = publish(&server, "");
    let cache = tempfile::tempdir().unwrap();
    let repo = repo(&server, "", cache.path());
    let ctx = CancelToken::new();

    let other = "a-corp/eagle/BT2000/v9.0.0-20240108140117-aaaaaaaaaaaa.tm.json";
    assert!(repo
        .fetch(&ctx, other)
        .unwrap_err()
        .is_not_found(NotFoundKind::Tm));
    assert!(repo
        .versions(&ctx, "a-corp/eagle/nope")
        .unwrap_err()
        .is_not_found(NotFoundKind::TmName));
    assert!(repo
        .fetch_attachment(&ctx, &AttachmentContainerRef::TmName(id.name()), "missing.md")
        .unwrap_err()
        .is_not_found(NotFoundKind::Attachment));
}

#[test]
fn index_is_cached_and_revalidated() {
    let server = MockServer::start();
    publish(&server, "");
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = CancelToken::new();
    let toc = "/.tmc/tm-catalog.toc.json";

    let fresh = repo(&server, "", cache_dir.path());
    fresh.list(&ctx, &SearchParams::default()).unwrap();
    fresh.list(&ctx, &SearchParams::default()).unwrap();
    assert_eq!(server.hits(toc), 1, "second list is served from cache");

    let stale = HttpRepo::new(
        RepoSpec::from_name("mirror"),
        RemoteConfig::new(&server.addr),
        Arc::new(HttpCache::new(cache_dir.path()).with_max_age(std::time::Duration::ZERO)),
    )
    .unwrap();
    let result = stale.list(&ctx, &SearchParams::default()).unwrap();
    assert_eq!(result.entries.len(), 1, "304 reuses the cached body");
    assert_eq!(server.hits(toc), 2);
    let revalidation = server
        .captured()
        .into_iter()
        .filter(|r| r.path == toc)
        .last()
        .unwrap();
    assert_eq!(
        revalidation.headers.get("if-none-match").map(String::as_str),
        Some(ETAG)
    );
}

#[test]
fn templated_location_substitutes_encoded_path() {
    let server = MockServer::start();
    let id = publish(&server, "");
    // The template server only knows the encoded form of the path.
    let encoded = format!("/raw?file={}", urlencoding::encode(&id.to_string()));
    server.serve(&encoded, b"{\"id\":\"x\"}");
    let cache = tempfile::tempdir().unwrap();
    let repo = repo(&server, "/raw?file={{ID}}", cache.path());

    let (_, body) = repo.fetch(&CancelToken::new(), &id.to_string()).unwrap();
    assert_eq!(body, b"{\"id\":\"x\"}");
}

#[test]
fn mutations_are_not_supported() {
    let server = MockServer::start();
    let id = publish(&server, "");
    let cache = tempfile::tempdir().unwrap();
    let repo = repo(&server, "", cache.path());
    let ctx = CancelToken::new();

    assert!(matches!(
        repo.import(&ctx, &id, TM.as_bytes(), &ImportOptions::default()),
        Err(RepoError::NotSupported(_))
    ));
    assert!(matches!(
        repo.delete(&ctx, &id.to_string()),
        Err(RepoError::NotSupported(_))
    ));
    assert!(matches!(repo.index(&ctx, &[]), Err(RepoError::NotSupported(_))));
}

#[test]
fn unreachable_index_is_an_error() {
    let server = MockServer::start();
    let cache = tempfile::tempdir().unwrap();
    let repo = repo(&server, "", cache.path());
    assert!(matches!(
        repo.list(&CancelToken::new(), &SearchParams::default()),
        Err(RepoError::NoIndex(_))
    ));
}
