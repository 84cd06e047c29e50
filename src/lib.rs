//! # jobwire-client
//!
//! Rust client SDK for queued remote function invocation.
//!
//! A served application declares its invokable functions in a config the
//! client fetches once. Each submission becomes a [`Job`]: a cancellable
//! handle over one invocation, driven on a bounded worker pool through
//! either a one-shot request/response transport or a persistent streaming
//! connection that delivers queue estimates, partial results, and the
//! final result as typed event messages.
//!
//! ## Architecture
//!
//! - **Endpoint registry**: config resolved once into addressable
//!   endpoints, each with ordered codecs and a chosen transport
//! - **Serialization layer**: static component-kind → codec mapping with
//!   multipart upload indirection for file payloads
//! - **Transport drivers**: simple POST, or WebSocket event state machine
//! - **Job**: lock-guarded lifecycle, blocking accessors, done-callbacks
//! - **Executor**: fixed worker pool, one dedicated runtime per job
//!
//! ## Example
//!
//! ```ignore
//! use jobwire_client::Client;
//! use serde_json::json;
//!
//! let client = Client::builder("http://localhost:7860").connect()?;
//! let job = client.submit("generate", vec![json!("a prompt")])?;
//! for partial in job.outputs() {
//!     println!("partial: {partial}");
//! }
//! println!("final: {}", job.result(None)?);
//! ```

pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod serializer;
pub mod transport;
pub mod upload;

mod client;
mod executor;
mod job;

pub use client::{Client, ClientBuilder};
pub use endpoint::{ApiTarget, Endpoint, TransportKind};
pub use error::{ClientError, Result};
pub use executor::DEFAULT_MAX_WORKERS;
pub use job::{Job, JobOutcome, JobState, QueueStatus};
