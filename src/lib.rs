#![cfg_attr(docsrs, feature(doc_cfg))]
//! # gmy-decomp
//!
//! gmy-decomp loads sparse, block-structured voxel geometries for
//! lattice-Boltzmann solvers and decomposes them across ranks. The domain is a
//! grid of cubic blocks, most of them solid; only blocks with fluid sites are
//! stored, each as a zlib-compressed body behind a small header.
//!
//! ## Pipeline
//! - [`geometry::HeaderIndex`] is read once and broadcast.
//! - [`decomposition::InitialBlockAssigner`] grows contiguous block regions,
//!   one per rank, balanced by fluid-site count.
//! - [`decomposition::ParallelBlockReader`] lets a small reading group read
//!   and inflate blocks, forwarding them to every rank that needs them.
//! - [`decomposition::GraphDecompositionOptimizer`] refines the assignment at
//!   site granularity through a [`partitioning::GraphPartitioner`].
//! - The blocks are read again and the moves applied; then
//!   [`lattice_data::LatticeData`] numbers the local sites and negotiates the
//!   halo layout with neighbouring ranks.
//!
//! [`decomposition::GeometryReader`] runs the whole pipeline.
//!
//! ## Communication
//! Everything collective goes through [`algs::Communicator`]. Use
//! [`algs::NoComm`] for serial runs, [`algs::LocalComm`] for in-process
//! worlds (tests), and `MpiComm` with the `mpi-support` feature.
//!
//! ```toml
//! [dependencies]
//! gmy-decomp = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "metis-support"]
//! ```
//!
//! The library logs through the `log` facade and installs no logger.

pub mod algs;
pub mod config;
pub mod decomp_error;
pub mod decomposition;
pub mod geometry;
pub mod lattice;
pub mod lattice_data;
pub mod partitioning;

pub use decomp_error::DecompError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, ComputeGroup, LocalComm, NoComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::config::DecompositionConfig;
    pub use crate::decomp_error::DecompError;
    pub use crate::decomposition::{
        DecompositionContext, GeometryReader, LoadedGeometry, MoveList,
    };
    pub use crate::geometry::{
        BlockSource, FileSource, Geometry, GeometryFileBuilder, HeaderIndex, MemorySource, Site,
    };
    pub use crate::lattice::LatticeInfo;
    pub use crate::lattice_data::{CollisionType, LatticeData, NeighbourProcessor};
    #[cfg(feature = "metis-support")]
    pub use crate::partitioning::MetisPartitioner;
    pub use crate::partitioning::{GraphPartitioner, KwayRefiner};
}
