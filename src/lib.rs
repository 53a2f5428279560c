//! Core state and data plumbing for a bilingual staining-company portal:
//! live change propagation from the reference store into list and timeline
//! views, notification aggregation with durable dismissal, a geocode cache
//! with in-flight deduplication, and resizable panel layout arithmetic.

pub mod db;
mod error;
pub mod feed;
pub mod geocode;
pub mod layout;
mod migrations;
pub mod notifications;
pub mod reconciler;
pub mod session;
pub mod state;
pub mod subscriber;
pub mod timeline;
pub mod types;
pub mod wizard;

pub use error::{PortalError, StoreError};
