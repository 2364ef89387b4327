//! Kubernetes controllers for DB cluster CRDs
//!
//! Controllers wire watches into the event router and drive reconcilers
//! from the work queue.

pub mod cluster_controller;

pub use cluster_controller::run as run_cluster_controller;

use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::identity::{default_scheme, Scheme};
use crate::pd::PdControl;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    pub config: OperatorConfig,
    /// Process-wide PD client cache
    pub pd_control: Arc<dyn PdControl>,
    pub scheme: Arc<Scheme>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig, pd_control: Arc<dyn PdControl>) -> Self {
        Self {
            client,
            config,
            pd_control,
            scheme: Arc::new(default_scheme()),
        }
    }
}
