//! Loading a geometry file and decomposing it across ranks.
//!
//! The pipeline is
//!
//! 1. read and broadcast the [`HeaderIndex`];
//! 2. assign blocks to ranks by region growing ([`InitialBlockAssigner`]);
//! 3. read the owned blocks plus a one-block halo ([`ParallelBlockReader`]);
//! 4. partition the site graph and agree on a [`MoveList`]
//!    ([`GraphDecompositionOptimizer`]);
//! 5. read again under the refined ownership and apply the moves.
//!
//! When rank 0 is reserved it only takes part in reading the header; the
//! remaining ranks decompose among themselves through a [`ComputeGroup`].

pub mod basic;
pub mod block_reader;
pub mod moves;
pub mod needs;
pub mod optimised;
pub mod validation;

pub use basic::{BlockOwnership, InitialBlockAssigner};
pub use block_reader::ParallelBlockReader;
pub use moves::{Move, MoveList, implement_moves, reread_map};
pub use optimised::GraphDecompositionOptimizer;

use crate::algs::communicator::{Communicator, ComputeGroup};
use crate::config::DecompositionConfig;
use crate::decomp_error::DecompError;
use crate::geometry::{BlockSource, Geometry, HeaderIndex};
use crate::lattice::LatticeInfo;
use crate::partitioning::{GraphPartitioner, KwayRefiner};

/// Reading core responsible for `block` in a group of `reading_group` ranks.
#[inline]
pub fn reading_core(block: usize, reading_group: usize) -> usize {
    block % reading_group
}

/// Everything a decomposition run needs, passed explicitly.
pub struct DecompositionContext<'c, C: Communicator + ?Sized> {
    pub comm: &'c C,
    pub config: DecompositionConfig,
    pub lattice: LatticeInfo,
}

impl<'c, C: Communicator + ?Sized> DecompositionContext<'c, C> {
    pub fn new(comm: &'c C, config: DecompositionConfig, lattice: LatticeInfo) -> Self {
        Self {
            comm,
            config,
            lattice,
        }
    }

    /// Offset from compute ranks to ranks of the full communicator.
    pub fn rank_offset(&self) -> usize {
        usize::from(self.config.reserve_io_rank && self.comm.size() > 1)
    }

    pub fn compute_ranks(&self) -> usize {
        self.comm.size() - self.rank_offset()
    }
}

/// Result of [`GeometryReader::load_and_decompose`] on one rank.
#[derive(Clone, Debug)]
pub struct LoadedGeometry {
    pub geometry: Geometry,
    pub header: HeaderIndex,
    /// Initial block owners, as compute ranks. All `None` on a reserved
    /// rank, which takes no part in the decomposition.
    pub block_owner: BlockOwnership,
    /// Empty on a reserved rank.
    pub moves: MoveList,
    pub rank_offset: usize,
}

pub struct GeometryReader<'c, C: Communicator + ?Sized, P = KwayRefiner> {
    ctx: DecompositionContext<'c, C>,
    partitioner: P,
}

impl<'c, C: Communicator + ?Sized> GeometryReader<'c, C, KwayRefiner> {
    pub fn new(ctx: DecompositionContext<'c, C>) -> Self {
        Self {
            ctx,
            partitioner: KwayRefiner,
        }
    }
}

impl<'c, C: Communicator + ?Sized, P: GraphPartitioner> GeometryReader<'c, C, P> {
    pub fn with_partitioner(ctx: DecompositionContext<'c, C>, partitioner: P) -> Self {
        Self { ctx, partitioner }
    }

    pub fn context(&self) -> &DecompositionContext<'c, C> {
        &self.ctx
    }

    /// Read `source` and decompose it; collective over the full communicator.
    pub fn load_and_decompose<S: BlockSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<LoadedGeometry, DecompError> {
        self.ctx.config.validate()?;
        let header = HeaderIndex::read_and_broadcast(self.ctx.comm, source)?;
        let mut geometry = Geometry::new(&header.preamble);
        let offset = self.ctx.rank_offset();

        if offset == 0 {
            let (block_owner, moves) =
                self.decompose(self.ctx.comm, &header, &mut geometry, source)?;
            return Ok(LoadedGeometry {
                geometry,
                header,
                block_owner,
                moves,
                rank_offset: offset,
            });
        }

        match ComputeGroup::excluding_first(self.ctx.comm) {
            Some(group) => {
                let (block_owner, moves) = self.decompose(&group, &header, &mut geometry, source)?;
                Ok(LoadedGeometry {
                    geometry,
                    header,
                    block_owner,
                    moves,
                    rank_offset: offset,
                })
            }
            None => {
                log::debug!("rank 0 is reserved and holds no sites");
                let block_owner = vec![None; header.block_count()];
                Ok(LoadedGeometry {
                    geometry,
                    header,
                    block_owner,
                    moves: MoveList::default(),
                    rank_offset: offset,
                })
            }
        }
    }

    fn decompose<CC, S>(
        &self,
        compute: &CC,
        header: &HeaderIndex,
        geometry: &mut Geometry,
        source: &S,
    ) -> Result<(BlockOwnership, MoveList), DecompError>
    where
        CC: Communicator + ?Sized,
        S: BlockSource + ?Sized,
    {
        let config = &self.ctx.config;
        let lattice = self.ctx.lattice;
        let offset = self.ctx.rank_offset();

        log::debug!("rank {}: initial block decomposition", compute.rank());
        let block_owner = InitialBlockAssigner::new(
            header.preamble.blocks,
            &header.fluid_sites_per_block(),
        )
        .assign(compute.size());
        if config.validate {
            validation::validate_block_map(compute, &block_owner)?;
        }

        let reader = ParallelBlockReader::new(
            compute,
            header,
            source,
            lattice,
            config.reading_group_size,
            offset,
            config.validate,
        );
        reader.read_blocks_with_halo(geometry, &block_owner)?;
        if config.validate {
            validation::validate_geometry(compute, geometry, lattice.q())?;
        }

        log::debug!("rank {}: optimising decomposition", compute.rank());
        let moves = GraphDecompositionOptimizer::new(
            compute,
            geometry,
            header,
            &block_owner,
            lattice,
            config,
        )
        .optimise(&self.partitioner)?;

        let reread = reread_map(&block_owner, &moves, compute.rank());
        reader.read_blocks_with_halo(geometry, &reread)?;
        let applied = implement_moves(geometry, &block_owner, &moves, offset, config.validate)?;
        log::debug!("rank {}: applied {applied} moves locally", compute.rank());
        if config.validate {
            validation::validate_geometry(compute, geometry, lattice.q())?;
        }
        Ok((block_owner, moves))
    }
}
