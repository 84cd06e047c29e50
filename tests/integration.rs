//! Integration tests for jobwire-client.
//!
//! Each test stands up an in-process fake app speaking plain HTTP on a
//! loopback port; streaming tests additionally upgrade `/queue/join`
//! connections to WebSocket and replay a scripted event sequence.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_tungstenite::tungstenite::Message;

use jobwire_client::{Client, ClientError, JobState};

// ---------------------------------------------------------------------------
// Fake app server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    body: String,
}

type RouteFn = dyn Fn(&Request) -> (u16, String) + Send + Sync;

struct FakeApp {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl FakeApp {
    fn root_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn requests_to(&self, path: &str) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

/// Stream that replays already-consumed handshake bytes before the socket.
struct ReplayStream {
    prefix: Vec<u8>,
    pos: usize,
    inner: tokio::net::TcpStream,
}

impl AsyncRead for ReplayStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos < self.prefix.len() {
            let n = (self.prefix.len() - self.pos).min(buf.remaining());
            let start = self.pos;
            buf.put_slice(&self.prefix[start..start + n]);
            self.pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ReplayStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Spawn the fake app on a background thread with its own runtime.
///
/// `routes` answers plain HTTP requests; `ws_script` is replayed on every
/// WebSocket connection after the submission envelope arrives.
fn spawn_app(
    routes: impl Fn(&Request) -> (u16, String) + Send + Sync + 'static,
    ws_script: Vec<Value>,
) -> FakeApp {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let requests: Arc<Mutex<Vec<Request>>> = Arc::new(Mutex::new(Vec::new()));
    let requests_bg = requests.clone();
    let routes: Arc<RouteFn> = Arc::new(routes);
    let ws_script = Arc::new(ws_script);

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let requests = requests_bg.clone();
                let routes = routes.clone();
                let ws_script = ws_script.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, requests, routes, ws_script).await;
                });
            }
        });
    });

    FakeApp { addr, requests }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    requests: Arc<Mutex<Vec<Request>>>,
    routes: Arc<RouteFn>,
    ws_script: Arc<Vec<Value>>,
) -> io::Result<()> {
    // Read the request head (and whatever body bytes arrive with it).
    let mut buf = Vec::new();
    let head_end = loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let is_upgrade = head.to_lowercase().contains("upgrade: websocket");
    if is_upgrade {
        let replay = ReplayStream {
            prefix: buf,
            pos: 0,
            inner: stream,
        };
        let mut ws = tokio_tungstenite::accept_async(replay)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        // First frame is the submission envelope.
        let envelope = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            _ => return Ok(()),
        };
        requests.lock().unwrap().push(Request {
            method: "WS".into(),
            path,
            body: envelope,
        });

        for event in ws_script.iter() {
            if ws
                .send(Message::Text(serde_json::to_string(event).unwrap()))
                .await
                .is_err()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = ws.close(None).await;
        return Ok(());
    }

    // Plain HTTP: read the declared body, then answer and close.
    let content_length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let request = Request {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    requests.lock().unwrap().push(request.clone());

    let routes = routes.clone();
    let (status, response_body) =
        tokio::task::spawn_blocking(move || routes(&request)).await.unwrap();
    let reply = format!(
        "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response_body}",
        response_body.len()
    );
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

// ---------------------------------------------------------------------------
// Shared config
// ---------------------------------------------------------------------------

fn app_config(enable_queue: bool) -> String {
    json!({
        "version": "3.4.0",
        "enable_queue": enable_queue,
        "dependencies": [
            {
                "inputs": [1, 4], "outputs": [2],
                "api_name": "echo", "backend_fn": true, "queue": false
            },
            {
                "inputs": [1], "outputs": [2],
                "api_name": "stream", "backend_fn": true, "queue": true
            },
            {
                "inputs": [1, 3, 4], "outputs": [2],
                "api_name": "tag_file", "backend_fn": true, "queue": false
            }
        ],
        "components": [
            {"id": 1, "type": "textbox"},
            {"id": 2, "type": "textbox"},
            {"id": 3, "type": "file"},
            {"id": 4, "type": "number"}
        ]
    })
    .to_string()
}

fn connect(app: &FakeApp) -> Client {
    Client::builder(app.root_url())
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .unwrap()
}

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

// ---------------------------------------------------------------------------
// Simple driver: queue disabled, exactly one POST per invocation
// ---------------------------------------------------------------------------

#[test]
fn simple_endpoint_makes_one_predict_request() {
    let config = app_config(false);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            "/api/predict" => (200, json!({"data": ["done"]}).to_string()),
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let client = connect(&app);
    let job = client.submit("echo", vec![json!("x"), json!(5)]).unwrap();

    assert_eq!(job.result(WAIT).unwrap(), json!("done"));
    assert_eq!(job.state(), JobState::Completed);

    let predicts = app.requests_to("/api/predict");
    assert_eq!(predicts.len(), 1);
    let envelope: Value = serde_json::from_str(&predicts[0].body).unwrap();
    assert_eq!(envelope["data"], json!(["x", 5]));
    assert_eq!(envelope["fn_index"], json!(0));
    assert!(!envelope["session_hash"].as_str().unwrap().is_empty());
    assert!(app.requests_to("/queue/join").is_empty());
}

#[test]
fn simple_endpoint_remote_error_surfaces_through_job() {
    let config = app_config(false);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            "/api/predict" => (200, json!({"error": "division by zero"}).to_string()),
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let client = connect(&app);
    let job = client.submit("echo", vec![json!("x"), json!(1)]).unwrap();

    assert!(matches!(job.result(WAIT), Err(ClientError::Remote(_))));
    assert_eq!(job.state(), JobState::Errored);
}

// ---------------------------------------------------------------------------
// Streaming driver: partials then completion
// ---------------------------------------------------------------------------

#[test]
fn streaming_endpoint_collects_partials_and_final() {
    let config = app_config(true);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            _ => (404, "{}".into()),
        },
        vec![
            json!({"msg": "estimation", "rank": 2, "queue_size": 3}),
            json!({"msg": "process_starts"}),
            json!({"msg": "process_generating", "output": {"data": ["a"]}, "success": true}),
            json!({"msg": "process_generating", "output": {"data": ["b"]}, "success": true}),
            json!({"msg": "process_completed", "output": {"data": ["b"]}, "success": true}),
        ],
    );

    let client = connect(&app);
    let job = client.submit("stream", vec![json!("go")]).unwrap();

    assert_eq!(job.result(WAIT).unwrap(), json!("b"));
    assert_eq!(job.state(), JobState::Completed);
    assert_eq!(job.outputs(), vec![json!("a"), json!("b")]);

    let joins = app.requests_to("/queue/join");
    assert_eq!(joins.len(), 1);
    let envelope: Value = serde_json::from_str(&joins[0].body).unwrap();
    assert_eq!(envelope["fn_index"], json!(1));
}

// ---------------------------------------------------------------------------
// Streaming driver: session_not_found terminates with SessionExpired
// ---------------------------------------------------------------------------

#[test]
fn session_not_found_yields_session_expired() {
    let config = app_config(true);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            _ => (404, "{}".into()),
        },
        vec![
            json!({"msg": "estimation", "rank": 0}),
            json!({
                "msg": "unexpected_error",
                "message": "Session not found",
                "session_not_found": true,
                "success": false
            }),
            // Late traffic after the terminal message must be ignored.
            json!({"msg": "process_starts"}),
            json!({"msg": "process_completed", "output": {"data": ["zombie"]}, "success": true}),
        ],
    );

    let client = connect(&app);
    let job = client.submit("stream", vec![json!("go")]).unwrap();

    assert!(matches!(
        job.error_of(WAIT).unwrap(),
        Some(ClientError::SessionExpired(_))
    ));
    assert_eq!(job.state(), JobState::Errored);
    assert!(job.outputs().is_empty());
}

#[test]
fn close_stream_before_terminal_fails_the_job() {
    let config = app_config(true);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            _ => (404, "{}".into()),
        },
        vec![
            json!({"msg": "estimation", "rank": 1}),
            json!({"msg": "process_starts"}),
            // Polite close with no result: the job must not stay Running.
            json!({"msg": "close_stream"}),
        ],
    );

    let client = connect(&app);
    let job = client.submit("stream", vec![json!("go")]).unwrap();

    assert!(matches!(job.result(WAIT), Err(ClientError::Transport(_))));
    assert_eq!(job.state(), JobState::Errored);
}

// ---------------------------------------------------------------------------
// Pool admission bounds concurrent transport connections
// ---------------------------------------------------------------------------

#[test]
fn third_job_waits_for_a_free_worker() {
    let config = app_config(false);
    let inflight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let inflight_srv = inflight.clone();
    let peak_srv = peak.clone();
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            "/api/predict" => {
                let now = inflight_srv.fetch_add(1, Ordering::SeqCst) + 1;
                peak_srv.fetch_max(now, Ordering::SeqCst);
                release_rx.lock().unwrap().recv().unwrap();
                inflight_srv.fetch_sub(1, Ordering::SeqCst);
                (200, json!({"data": ["ok"]}).to_string())
            }
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let client = Client::builder(app.root_url())
        .max_workers(2)
        .connect()
        .unwrap();

    let jobs: Vec<_> = (0..3)
        .map(|_| client.submit("echo", vec![json!("x"), json!(1)]).unwrap())
        .collect();

    // Give the pool time to admit work: only two connections may open.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(app.requests_to("/api/predict").len(), 2);

    // Releasing one worker admits the third job.
    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();
    for job in &jobs {
        assert_eq!(job.result(WAIT).unwrap(), json!("ok"));
    }
    assert_eq!(app.requests_to("/api/predict").len(), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

// ---------------------------------------------------------------------------
// Upload indirection for file parameters
// ---------------------------------------------------------------------------

#[test]
fn file_parameter_goes_through_one_upload() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("cat.png");
    std::fs::write(&file_path, b"png bytes").unwrap();

    let config = app_config(false);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            "/upload" => (200, json!(["srv/files/cat.png"]).to_string()),
            "/api/predict" => (200, json!({"data": ["tagged"]}).to_string()),
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let client = connect(&app);
    let job = client
        .submit(
            "tag_file",
            vec![
                json!("label"),
                json!(file_path.to_string_lossy()),
                json!(3),
            ],
        )
        .unwrap();
    assert_eq!(job.result(WAIT).unwrap(), json!("tagged"));

    // Exactly one upload, carrying only the file value.
    let uploads = app.requests_to("/upload");
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].body.contains("png bytes"));
    assert!(!uploads[0].body.contains("label"));

    // The server reference replaced the local path at the right index.
    let predicts = app.requests_to("/api/predict");
    assert_eq!(predicts.len(), 1);
    let envelope: Value = serde_json::from_str(&predicts[0].body).unwrap();
    assert_eq!(envelope["data"][0], json!("label"));
    assert_eq!(envelope["data"][1]["name"], json!("srv/files/cat.png"));
    assert_eq!(envelope["data"][1]["is_file"], json!(true));
    assert_eq!(envelope["data"][2], json!(3));
}

#[test]
fn failed_upload_degrades_to_local_references() {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("cat.png");
    std::fs::write(&file_path, b"png bytes").unwrap();
    let local = file_path.to_string_lossy().into_owned();

    let config = app_config(false);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            "/upload" => (500, "{}".into()),
            "/api/predict" => (200, json!({"data": ["tagged"]}).to_string()),
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let client = connect(&app);
    let job = client
        .submit(
            "tag_file",
            vec![json!("label"), json!(local.clone()), json!(3)],
        )
        .unwrap();
    assert_eq!(job.result(WAIT).unwrap(), json!("tagged"));

    // Degraded outcome: the local path went out unchanged.
    let predicts = app.requests_to("/api/predict");
    let envelope: Value = serde_json::from_str(&predicts[0].body).unwrap();
    assert_eq!(envelope["data"][1]["name"], json!(local));
}

// ---------------------------------------------------------------------------
// Setup-time and cancellation behavior
// ---------------------------------------------------------------------------

#[test]
fn unknown_endpoint_and_bad_arity_fail_synchronously() {
    let config = app_config(false);
    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            _ => (404, "{}".into()),
        },
        vec![],
    );
    let client = connect(&app);

    assert!(matches!(
        client.submit("missing", vec![]),
        Err(ClientError::UnknownEndpoint(_))
    ));
    assert!(matches!(
        client.submit("echo", vec![json!("only one")]),
        Err(ClientError::ArgumentCount {
            expected: 2,
            got: 1
        })
    ));
    // Neither attempt reached the network.
    assert!(app.requests_to("/api/predict").is_empty());
}

#[test]
fn legacy_config_version_is_rejected() {
    let app = spawn_app(
        |req| match req.path.as_str() {
            "/config" => (
                200,
                json!({"version": "2.7.0", "dependencies": [], "components": []}).to_string(),
            ),
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let result = Client::builder(app.root_url()).connect();
    assert!(matches!(result, Err(ClientError::ConfigFetch(_))));
}

#[test]
fn cancel_before_dispatch_prevents_any_request() {
    let config = app_config(false);
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let app = spawn_app(
        move |req| match req.path.as_str() {
            "/config" => (200, config.clone()),
            "/api/predict" => {
                release_rx.lock().unwrap().recv().unwrap();
                (200, json!({"data": ["ok"]}).to_string())
            }
            _ => (404, "{}".into()),
        },
        vec![],
    );

    let client = Client::builder(app.root_url())
        .max_workers(1)
        .connect()
        .unwrap();

    // Occupy the only worker, then cancel a queued job before dispatch.
    let blocker = client.submit("echo", vec![json!("x"), json!(1)]).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let queued = client.submit("echo", vec![json!("y"), json!(2)]).unwrap();

    assert!(queued.cancel());
    assert_eq!(queued.state(), JobState::Cancelled);
    assert!(matches!(queued.result(WAIT), Err(ClientError::Cancelled)));

    release_tx.send(()).unwrap();
    assert_eq!(blocker.result(WAIT).unwrap(), json!("ok"));

    // The cancelled job never opened a transport connection.
    assert_eq!(app.requests_to("/api/predict").len(), 1);
}
