//! Reconcilers for DB cluster CRDs
//!
//! Reconcilers hold the business logic run for each dequeued key; they
//! report transient and benign outcomes through [`crate::Error::requeue`]
//! and [`crate::Error::ignore`].

pub mod cluster;
