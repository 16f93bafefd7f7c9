//! An operator translating `IstioOperator` mesh installs into chart-oriented
//! `HelmApp` installs.
//!
//! The [`controller`] watches `IstioOperator`s, derives one `HelmApp` per
//! `IstioOperator` via the [`convert::Converter`] and mirrors the install
//! phase of the `HelmApp` back into the `IstioOperator` status.

pub mod cli;
pub mod component;
pub mod constants;
pub mod controller;
pub mod convert;
pub mod crd;
pub mod logging;
pub mod migration;
pub mod schema;
pub mod store;
pub mod values;

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use schemars;
