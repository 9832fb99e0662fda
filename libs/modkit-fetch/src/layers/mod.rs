//! Tower layers for the HTTP client stack
//!
//! - [`RequestSpanLayer`] - Wraps outbound requests in tracing spans

mod request_span;

pub use request_span::{RequestSpanLayer, RequestSpanService};
