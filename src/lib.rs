//! Request-execution core of an API gateway.
//!
//! For every inbound request an [`reactor::ApiReactor`] resolves which API
//! definition applies, runs the configured pipeline (processor chains,
//! security chain, platform/plan/API flows, backend invocation) and produces a
//! response, with graceful startup/shutdown and partial-failure recovery.
//! Transport, plugin loading and management concerns live outside this crate;
//! it operates purely on in-memory execution contexts.

pub mod config;
pub mod core;
pub mod endpoint;
pub mod entrypoint;
pub mod flow;
pub mod policy;
pub mod processor;
pub mod reactor;
pub mod resource;
pub mod security;
