//! ComfyUI render backend for the LOOKS worker.
//!
//! Provides the HTTP API wrapper, history parsing, a WebSocket listener
//! that records step progress per prompt, reconnection logic, and
//! [`ComfyUIBackend`], the [`RenderBackend`] implementation the job
//! executor drives.
//!
//! [`RenderBackend`]: looks_core::render::RenderBackend

pub mod api;
pub mod backend;
pub mod client;
pub mod history;
pub mod messages;
pub mod reconnect;
pub mod tracker;

pub use backend::ComfyUIBackend;
