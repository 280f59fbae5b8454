//! Kubernetes controller running ephemeral GitHub Actions runners.
//!
//! Every `Runner` custom resource owns a [wire::Wire]: a registered runner identity and
//! a long-poll listener against the Actions agent service. Job requests picked up by the
//! listener are materialised as `JobResource` objects, which in turn get a worker pod.
pub mod actions;
pub mod cli;
pub mod config;
pub mod controller;
pub mod converters;
pub mod crd;
pub mod dot_files;
pub mod event;
pub mod github;
pub mod http_server;
pub mod instrumentation;
pub mod k8s;
pub mod metrics;
pub mod policy;
pub mod webhook;
pub mod wire;
