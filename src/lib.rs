//! kubeapp: Kubernetes application lifecycle management
//!
//! Uploads, applies, removes and deletes multi-chart application bundles
//! through an Armada helper container.

pub mod app;
pub mod commands;
pub mod config;
pub mod k8s;
pub mod utils;
