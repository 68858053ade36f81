//! # keyswitch-b2
//!
//! Minimal Backblaze B2 client used to sync registry snapshots:
//! - Account authorization with a cached session token
//! - Bucket id resolution by name
//! - Upload, download, and idempotent delete of a single object
//!
//! Every network call runs under a [`RequestContext`] that carries an optional
//! deadline and cancellation signal.

mod client;
mod context;
mod error;
mod naming;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{B2Client, DEFAULT_AUTH_URL};
pub use context::{CancelHandle, RequestContext};
pub use error::{B2Error, Result};
pub use naming::{normalize_profile, object_name, sanitize_object_key};
