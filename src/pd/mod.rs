//! PD (placement driver) clients
//!
//! PD is the metadata and placement service of a database cluster. This
//! module defines the client interfaces the resolver works against, the
//! HTTP implementation with its process-wide cache, and fakes for tests.

mod client;
mod control;
pub mod fake;
mod http;
pub mod tls;

pub use client::*;
pub use control::DefaultPdControl;
pub use http::{HttpPdClient, HttpPdmsClient, TlsSource};
