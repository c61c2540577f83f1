// THEORY:
// This file is the main entry point for the `gesture_vision` library crate.
// It defines the public API exposed to external consumers: the hand-tracking
// front end that feeds landmark frames in, and the UI layer that starts training,
// toggles detection and renders the resulting log.
//
// The primary goal is to export the two pipelines (`GesturePipeline` for a
// caller-driven frame loop, `ParallelPipeline` for a tokio worker) together with
// their configuration and report types. The learning machinery itself lives in
// `core_modules` and is reachable for callers that want to compose it directly.

pub mod bus;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::SessionConfig;
pub use error::{GestureError, Result};
