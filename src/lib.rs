// Warnings (other than unused variables) in doctests are promoted to errors.
#![doc(test(attr(deny(warnings))))]
#![doc(test(attr(allow(dead_code))))]
#![doc(test(attr(allow(unused_variables))))]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::invalid_codeblock_attributes)]

//! # An in-process transactional HTTP edge cache.
//!
//! This crate provides the primitive operations required to build
//! high-performance cache applications: keyed lookups with `Vary`-style
//! request-header matching, streaming insertion with concurrent readers,
//! and transactions that collapse concurrent misses onto a single writer.
//!
//! The entry point is [`CoreCache`]; see the [`core`] module documentation
//! for an overview of the data model. For one-line get/set/purge usage, see
//! the [`simple`] module.

pub mod body;
pub mod convert;
pub mod core;
pub mod error;
pub mod limits;
pub mod simple;
pub mod transaction;

#[doc(inline)]
pub use crate::body::{Body, StreamingBody};
#[doc(inline)]
pub use crate::core::{CacheKey, CoreCache, Found, LookupState};
#[doc(inline)]
pub use crate::error::CacheError;
#[doc(inline)]
pub use crate::transaction::Transaction;
