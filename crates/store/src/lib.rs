//! Persistence primitives for peerdrop stores.
//!
//! Checkpoint and queue stores are async traits whose methods return a
//! [`BoxFuture`], so managers stay testable against in-memory fakes and
//! independent of any real database. File-backed stores build on
//! [`write_atomic`] and [`JsonMapFile`].

mod atomic;
mod error;
mod json_map;
mod key;

use std::future::Future;
use std::pin::Pin;

pub use atomic::write_atomic;
pub use error::StoreError;
pub use json_map::JsonMapFile;
pub use key::validate_key;

/// Boxed, sendable future returned by store and transport trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
