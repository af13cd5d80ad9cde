//! Object identity for the grix git library.
//!
//! This crate provides the core `Oid` type (a fixed 20-byte SHA-1 content
//! identifier), hex encoding/decoding including short-prefix handling, and
//! the hasher that computes an object's address from its framed content.

mod error;
pub mod hex;
mod hasher;
mod oid;

pub use error::HashError;
pub use hasher::Hasher;
pub use oid::Oid;
