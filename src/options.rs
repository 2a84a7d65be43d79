//! Contains all of the types needed to specify options to operations.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a
//! type-safe builder API on them. For example, to create an instance of
//! [`FindOptions`] with only `limit` and `batch_size` set, the builder API can
//! be used as follows:
//!
//! ```rust
//! use dbset::options::FindOptions;
//!
//! let options = FindOptions::builder()
//!                   .limit(20)
//!                   .batch_size(5u32)
//!                   .build();
//! ```

pub use crate::coll::options::*;
pub use crate::coll::DbSetOptions;
pub use crate::context::DbContextOptions;

pub use mongodb::IndexModel;
pub use mongodb::options::IndexOptions;
