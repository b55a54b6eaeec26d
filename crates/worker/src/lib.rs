//! LOOKS render worker process: configuration and lifecycle supervision.

pub mod config;
pub mod supervisor;
