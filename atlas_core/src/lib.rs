//! # Atlas core
//!
//! Storage-independent building blocks: the [`Region`] model with its store
//! contract, and the revision chain that orders schema migration steps.

#![deny(missing_docs)]

mod region;
mod revision;

pub use region::{Geometry, Region, RegionStore, RegionStoreError, WEB_MERCATOR_SRID};
pub use revision::{RevisionChain, RevisionGraphError, Revisioned};

pub mod prelude {
    //! The prelude module for the `atlas` crates.
    pub use super::{
        Geometry, Region, RegionStore, RegionStoreError, RevisionChain, RevisionGraphError,
        Revisioned, WEB_MERCATOR_SRID,
    };
}
