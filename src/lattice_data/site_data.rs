//! Per-site classification used to order the local sites.

use crate::geometry::{IntersectionType, Link, Site};

/// Collision type of a fluid site, derived from what its links cross.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum CollisionType {
    Fluid,
    Wall,
    Inlet,
    Outlet,
    InletWall,
    OutletWall,
}

impl CollisionType {
    pub const ALL: [CollisionType; 6] = [
        CollisionType::Fluid,
        CollisionType::Wall,
        CollisionType::Inlet,
        CollisionType::Outlet,
        CollisionType::InletWall,
        CollisionType::OutletWall,
    ];
    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    /// Inlet links take precedence over outlet links.
    pub fn classify(site: &Site) -> Self {
        let wall = site.has_link_of(IntersectionType::Wall);
        if site.has_link_of(IntersectionType::Inlet) {
            if wall {
                CollisionType::InletWall
            } else {
                CollisionType::Inlet
            }
        } else if site.has_link_of(IntersectionType::Outlet) {
            if wall {
                CollisionType::OutletWall
            } else {
                CollisionType::Outlet
            }
        } else if wall {
            CollisionType::Wall
        } else {
            CollisionType::Fluid
        }
    }

    pub fn is_wall(self) -> bool {
        matches!(
            self,
            CollisionType::Wall | CollisionType::InletWall | CollisionType::OutletWall
        )
    }
}

/// A fluid site owned by this rank.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalSite {
    pub block: usize,
    pub site: usize,
    pub coords: [i64; 3],
    pub collision: CollisionType,
    /// Set when some lattice neighbour belongs to another rank.
    pub domain_edge: bool,
    pub wall_normal: Option<[f32; 3]>,
    /// Id of the inlet or outlet crossed by this site's links, if any.
    pub iolet_id: Option<u32>,
    /// Links for directions `1..Q`.
    pub links: Vec<Link>,
}

impl LocalSite {
    pub fn new(block: usize, site: usize, coords: [i64; 3], data: &Site, domain_edge: bool) -> Self {
        let collision = CollisionType::classify(data);
        let iolet_kind = match collision {
            CollisionType::Inlet | CollisionType::InletWall => Some(IntersectionType::Inlet),
            CollisionType::Outlet | CollisionType::OutletWall => Some(IntersectionType::Outlet),
            CollisionType::Fluid | CollisionType::Wall => None,
        };
        let iolet_id = iolet_kind.and_then(|kind| {
            data.links
                .iter()
                .find(|l| l.kind == kind)
                .and_then(|l| l.iolet_id)
        });
        Self {
            block,
            site,
            coords,
            collision,
            domain_edge,
            wall_normal: data.wall_normal,
            iolet_id,
            links: data.links.clone(),
        }
    }

    /// Distance to the wall along `direction`, if that link crosses one.
    pub fn wall_distance(&self, direction: usize) -> Option<f32> {
        let link = self.links.get(direction.checked_sub(1)?)?;
        (link.kind == IntersectionType::Wall).then_some(link.distance)
    }

    /// Distance to the intersection along `direction`, for any intersection.
    pub fn cut_distance(&self, direction: usize) -> Option<f32> {
        let link = self.links.get(direction.checked_sub(1)?)?;
        (link.kind != IntersectionType::None).then_some(link.distance)
    }

    /// Key of the contiguous local ordering.
    pub(crate) fn order_key(&self) -> (bool, CollisionType) {
        (self.domain_edge, self.collision)
    }
}
