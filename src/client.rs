//! Client builder and submission pipeline.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the
//! connection; [`Client::submit`] resolves an endpoint, runs the
//! setup-time checks synchronously, and hands the rest of the pipeline
//! (state insertion → serialize → transport → deserialize →
//! post-processing) to a pool worker, returning the [`Job`] handle
//! immediately.
//!
//! # Example
//!
//! ```ignore
//! use jobwire_client::Client;
//! use serde_json::json;
//!
//! let client = Client::builder("http://localhost:7860").connect()?;
//! let job = client.submit("generate", vec![json!("a prompt")])?;
//! let result = job.result(None)?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::codec::DeserializeContext;
use crate::config::{fetch_config, AppConfig};
use crate::endpoint::{ApiTarget, Endpoint, EndpointRegistry, TransportKind};
use crate::error::{ClientError, Result};
use crate::executor::{job_runtime, WorkerPool, DEFAULT_MAX_WORKERS};
use crate::job::{Job, JobState};
use crate::protocol::SubmitEnvelope;
use crate::serializer::{OutputPipeline, SerializerSet};
use crate::transport::{
    build_ws_url, SimpleDriver, StreamingDriver, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
};

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    root_url: String,
    auth_token: Option<String>,
    max_workers: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    download_dir: Option<PathBuf>,
}

impl ClientBuilder {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into(),
            auth_token: None,
            max_workers: DEFAULT_MAX_WORKERS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            download_dir: None,
        }
    }

    /// Bearer credential attached to HTTP requests and artifact downloads.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Bound on concurrently in-flight jobs. Default: 4.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Bound on opening any connection. Default: 10 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on streaming-connection silence. Default: 60 seconds.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Where downloaded artifacts land. Default: a temp subdirectory.
    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Fetch the app config, build the endpoint registry, start the pool.
    ///
    /// Setup-time failures (unreachable app, unparseable or legacy config,
    /// unresolvable components) surface here, before any job exists.
    pub fn connect(self) -> Result<Client> {
        let root_url = self.root_url.trim_end_matches('/').to_string();

        let mut http_builder = reqwest::Client::builder().connect_timeout(self.connect_timeout);
        if let Some(token) = &self.auth_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = format!("Bearer {token}");
            headers.insert(
                reqwest::header::AUTHORIZATION,
                value.parse().map_err(|_| {
                    ClientError::ConfigFetch("auth token is not a valid header value".into())
                })?,
            );
            http_builder = http_builder.default_headers(headers);
        }
        let http = http_builder.build()?;

        let rt = job_runtime()?;
        let config = rt.block_on(fetch_config(&http, &root_url))?;
        let registry = EndpointRegistry::new(&config)?;
        tracing::debug!(
            version = %config.version,
            endpoints = registry.endpoints().len(),
            "connected"
        );

        let download_dir = self
            .download_dir
            .unwrap_or_else(|| std::env::temp_dir().join("jobwire"));

        Ok(Client {
            shared: Arc::new(ClientShared {
                http,
                root_url,
                auth_token: self.auth_token,
                config,
                registry,
                download_dir,
                connect_timeout: self.connect_timeout,
                idle_timeout: self.idle_timeout,
            }),
            pool: WorkerPool::new(self.max_workers),
        })
    }
}

/// Immutable per-client state shared with pipeline workers.
struct ClientShared {
    http: reqwest::Client,
    root_url: String,
    auth_token: Option<String>,
    config: AppConfig,
    registry: EndpointRegistry,
    download_dir: PathBuf,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

/// A connected client for one served application.
pub struct Client {
    shared: Arc<ClientShared>,
    pool: WorkerPool,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(root_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(root_url)
    }

    /// The parsed application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.shared.config
    }

    /// All resolvable endpoints.
    pub fn endpoints(&self) -> &[Endpoint] {
        self.shared.registry.endpoints()
    }

    /// Submit one invocation and return its handle immediately.
    ///
    /// Endpoint resolution, codec resolution, and the arity check run
    /// synchronously here; everything that touches the network happens on
    /// a pool worker.
    pub fn submit(&self, target: impl Into<ApiTarget>, args: Vec<Value>) -> Result<Job> {
        let endpoint = self.shared.registry.resolve(&target.into())?.clone();
        let serializers = SerializerSet::for_endpoint(&endpoint);

        let expected = serializers.expected_args();
        if args.len() != expected {
            return Err(ClientError::ArgumentCount {
                expected,
                got: args.len(),
            });
        }

        let job = Job::new(uuid::Uuid::new_v4().simple().to_string(), endpoint.fn_index);
        tracing::debug!(
            session = job.session_hash(),
            fn_index = endpoint.fn_index,
            "job submitted"
        );

        let shared = self.shared.clone();
        let worker_job = job.clone();
        self.pool.spawn(move || {
            run_pipeline(shared, endpoint, serializers, worker_job, args);
        });
        Ok(job)
    }

    /// Convenience wrapper: submit and block for the result.
    pub fn predict(&self, target: impl Into<ApiTarget>, args: Vec<Value>) -> Result<Value> {
        self.submit(target, args)?.result(None)
    }
}

/// Entry point each pool worker runs for one job.
fn run_pipeline(
    shared: Arc<ClientShared>,
    endpoint: Endpoint,
    serializers: SerializerSet,
    job: Job,
    args: Vec<Value>,
) {
    // Pre-dispatch cancellation is exact: no connection is ever opened.
    if job.is_cancel_requested() || !job.mark_dispatched() {
        return;
    }

    let rt = match job_runtime() {
        Ok(rt) => rt,
        Err(e) => {
            job.fail(e.into());
            return;
        }
    };

    let outcome = rt.block_on(drive(&shared, &endpoint, &serializers, &job, args));
    if let Err(error) = outcome {
        // No-op if the job already reached a terminal state.
        job.fail(error);
    }
}

async fn drive(
    shared: &ClientShared,
    endpoint: &Endpoint,
    serializers: &SerializerSet,
    job: &Job,
    args: Vec<Value>,
) -> Result<()> {
    let with_state = serializers.insert_state(args)?;
    let data = serializers
        .serialize(&shared.http, &shared.root_url, with_state)
        .await?;

    let envelope = SubmitEnvelope {
        data,
        fn_index: endpoint.fn_index,
        session_hash: job.session_hash().to_string(),
    };

    let mut ctx = DeserializeContext::new(shared.download_dir.clone(), shared.root_url.clone());
    if let Some(token) = &shared.auth_token {
        ctx = ctx.with_auth(token.clone());
    }
    let pipeline = OutputPipeline {
        http: &shared.http,
        serializers,
        ctx: &ctx,
    };

    match endpoint.transport {
        TransportKind::Simple => {
            job.advance(JobState::Running);
            let raw = SimpleDriver::invoke(&shared.http, &shared.root_url, &envelope).await?;
            let value = pipeline.process(raw).await?;
            job.complete(value.clone(), value);
            Ok(())
        }
        TransportKind::Streaming => {
            let driver = StreamingDriver {
                connect_timeout: shared.connect_timeout,
                idle_timeout: shared.idle_timeout,
            };
            driver
                .run(job, &build_ws_url(&shared.root_url), &envelope, &pipeline)
                .await
        }
    }
}
