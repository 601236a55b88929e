//! Platform agnostic save system for games.
//!
//! Saves are archives of named byte blobs committed atomically to a pluggable
//! backend, see the [`save`] module. Most apps only need the [`prelude`].

pub mod prelude;
pub mod save;
