//! Command implementations for kubeapp CLI

pub mod app;
pub mod check;
