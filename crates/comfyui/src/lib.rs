//! ComfyUI WebSocket and REST client library.
//!
//! Everything the bridge needs to drive a ComfyUI instance: typed
//! message parsing, workflow template patching, HTTP API wrappers,
//! output-slot completion tracking over either the event stream or
//! history polling, and the submit -> track -> fetch pipeline.

pub mod api;
pub mod client;
pub mod messages;
pub mod outputs;
pub mod pipeline;
pub mod tracker;
pub mod workflow;
