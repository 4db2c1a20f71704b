pub mod api;
pub mod app;
pub mod cmd;
pub mod config;
pub mod error;
pub mod kube;
pub mod kustomize;
pub mod logging;
pub mod operator;
pub mod signal;
pub mod workers;
