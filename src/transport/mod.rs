//! Transport drivers: one-shot request/response and persistent streaming.

mod simple;
mod streaming;

pub use simple::SimpleDriver;
pub use streaming::{
    apply_event, build_ws_url, EventAction, StreamingDriver, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_IDLE_TIMEOUT,
};
