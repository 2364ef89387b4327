//! Identity and ownership of managed objects
//!
//! Owner references tie dependents to the resource that controls them; the
//! scheme maps type-erased objects back to their kind.

mod key;
mod owner;
mod scheme;

pub use key::ObjectKey;
pub use owner::*;
pub use scheme::*;

/// Label marking objects created by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on objects created by this operator
pub const MANAGED_BY: &str = "db-cluster-operator";
