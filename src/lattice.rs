//! Discrete velocity sets.
//!
//! Direction 0 is always the rest vector; the remaining directions come in
//! opposite pairs `(2k - 1, 2k)`.

const D3Q15_C: [[i32; 3]; 15] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 1],
    [-1, -1, -1],
    [1, 1, -1],
    [-1, -1, 1],
    [1, -1, 1],
    [-1, 1, -1],
    [-1, 1, 1],
    [1, -1, -1],
];

const D3Q19_C: [[i32; 3]; 19] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [-1, -1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [0, 1, 1],
    [0, -1, -1],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, -1],
    [0, -1, 1],
];

const D3Q27_C: [[i32; 3]; 27] = [
    [0, 0, 0],
    [1, 0, 0],
    [-1, 0, 0],
    [0, 1, 0],
    [0, -1, 0],
    [0, 0, 1],
    [0, 0, -1],
    [1, 1, 0],
    [-1, -1, 0],
    [1, 0, 1],
    [-1, 0, -1],
    [0, 1, 1],
    [0, -1, -1],
    [1, -1, 0],
    [-1, 1, 0],
    [1, 0, -1],
    [-1, 0, 1],
    [0, 1, -1],
    [0, -1, 1],
    [1, 1, 1],
    [-1, -1, -1],
    [1, 1, -1],
    [-1, -1, 1],
    [1, -1, 1],
    [-1, 1, -1],
    [-1, 1, 1],
    [1, -1, -1],
];

/// Direction vectors of a lattice model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatticeInfo {
    name: &'static str,
    c: &'static [[i32; 3]],
}

impl LatticeInfo {
    pub const D3Q15: LatticeInfo = LatticeInfo {
        name: "D3Q15",
        c: &D3Q15_C,
    };
    /// Rest, faces and edges of the unit cube.
    pub const D3Q19: LatticeInfo = LatticeInfo {
        name: "D3Q19",
        c: &D3Q19_C,
    };
    pub const D3Q27: LatticeInfo = LatticeInfo {
        name: "D3Q27",
        c: &D3Q27_C,
    };

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of directions, including the rest direction.
    #[inline]
    pub fn q(&self) -> usize {
        self.c.len()
    }

    #[inline]
    pub fn vector(&self, direction: usize) -> [i32; 3] {
        self.c[direction]
    }

    pub fn vectors(&self) -> &'static [[i32; 3]] {
        self.c
    }

    /// The direction pointing the opposite way.
    #[inline]
    pub fn inverse(&self, direction: usize) -> usize {
        match direction {
            0 => 0,
            d if d % 2 == 1 => d + 1,
            d => d - 1,
        }
    }

    /// Direction with vector `v`, if the lattice has one.
    pub fn direction_of(&self, v: [i32; 3]) -> Option<usize> {
        self.c.iter().position(|&c| c == v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_negates_every_vector() {
        for lattice in [LatticeInfo::D3Q15, LatticeInfo::D3Q19, LatticeInfo::D3Q27] {
            for d in 0..lattice.q() {
                let v = lattice.vector(d);
                let inv = lattice.vector(lattice.inverse(d));
                assert_eq!([-v[0], -v[1], -v[2]], inv, "{} direction {d}", lattice.name());
                assert_eq!(lattice.inverse(lattice.inverse(d)), d);
            }
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(LatticeInfo::D3Q15.q(), 15);
        assert_eq!(LatticeInfo::D3Q19.q(), 19);
        assert_eq!(LatticeInfo::D3Q27.q(), 27);
        assert_eq!(LatticeInfo::D3Q19.direction_of([0, -1, 1]), Some(18));
        assert_eq!(LatticeInfo::D3Q15.direction_of([1, 1, 0]), None);
    }
}
