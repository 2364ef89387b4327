//! DB Cluster Kubernetes Operator
//!
//! Core of an operator managing distributed database clusters: resolving a
//! reachable PD (placement driver) client, persisting changes under
//! optimistic concurrency, routing watch events to reconcile keys and
//! identifying the objects that control them.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod pd;
pub mod reconcilers;
pub mod resolver;
pub mod router;
pub mod update;

pub use error::{Error, Result};
