//! Saves the trials of a behavioral experiment to a remote store while the
//! experiment is still running.
//!
//! Pick a store from [`backend`], wrap it in a [`DocumentManager`] or a
//! [`RowManager`], and hand the runner the two hooks from [`Manager`].

pub mod api;
pub mod backend;
pub mod config;
pub mod tracking;

pub use api::id::{DocumentId, RowId};
pub use api::trial::TrialData;
pub use tracking::{DocumentManager, Manager, ManagerError, ManagerOptions, RowManager};
