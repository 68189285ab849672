//! Grid positions, connection faces, and face sets.
//!
//! A [`Position`] identifies one cell of the 3D grid. A [`Face`] is one of the
//! six axis-aligned sides of a cell. Positions have a compact 64-bit linear
//! encoding used by the persisted network layout.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

const X_BITS: u32 = 26;
const Z_BITS: u32 = 26;
const Y_BITS: u32 = 12;
const Y_SHIFT: u32 = Z_BITS;
const X_SHIFT: u32 = Y_SHIFT + Y_BITS;
const X_MASK: i64 = (1 << X_BITS) - 1;
const Y_MASK: i64 = (1 << Y_BITS) - 1;
const Z_MASK: i64 = (1 << Z_BITS) - 1;

/// A cell on the 3D grid.
///
/// Ordering is lexicographic on `(x, y, z)`, which gives deterministic
/// iteration wherever positions key a `BTreeMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The neighbouring cell across `face`.
    pub fn offset(self, face: Face) -> Self {
        let (dx, dy, dz) = face.offset();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Pack into the 64-bit linear encoding (26 bits x, 12 bits y, 26 bits z).
    pub fn to_long(self) -> i64 {
        ((self.x as i64 & X_MASK) << X_SHIFT)
            | ((self.y as i64 & Y_MASK) << Y_SHIFT)
            | (self.z as i64 & Z_MASK)
    }

    /// Unpack the 64-bit linear encoding. Each field is sign-extended.
    pub fn from_long(packed: i64) -> Self {
        let x = (packed << (64 - X_SHIFT - X_BITS)) >> (64 - X_BITS);
        let y = (packed << (64 - Y_SHIFT - Y_BITS)) >> (64 - Y_BITS);
        let z = (packed << (64 - Z_BITS)) >> (64 - Z_BITS);
        Self::new(x as i32, y as i32, z as i32)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Face
// ---------------------------------------------------------------------------

/// One of the six sides of a grid cell.
///
/// The discriminant is the persisted face index. `North` points towards -z,
/// `East` towards +x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Face {
    Down = 0,
    Up = 1,
    North = 2,
    South = 3,
    West = 4,
    East = 5,
}

impl Face {
    /// All faces in index order. Traversals visit neighbours in this order.
    pub const ALL: [Face; 6] = [
        Face::Down,
        Face::Up,
        Face::North,
        Face::South,
        Face::West,
        Face::East,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a face by its persisted index. Negative or out-of-range
    /// indices mean "no face".
    pub fn from_index(index: i32) -> Option<Face> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Face::ALL.get(i).copied())
    }

    pub fn opposite(self) -> Face {
        match self {
            Face::Down => Face::Up,
            Face::Up => Face::Down,
            Face::North => Face::South,
            Face::South => Face::North,
            Face::West => Face::East,
            Face::East => Face::West,
        }
    }

    /// Unit offset `(dx, dy, dz)` towards this face.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Face::Down => (0, -1, 0),
            Face::Up => (0, 1, 0),
            Face::North => (0, 0, -1),
            Face::South => (0, 0, 1),
            Face::West => (-1, 0, 0),
            Face::East => (1, 0, 0),
        }
    }
}

/// Encode an optional face as its persisted index, `-1` for none.
pub fn face_to_index(face: Option<Face>) -> i8 {
    face.map_or(-1, |f| f.index() as i8)
}

/// Decode a persisted face index. Negative means no face; an index past the
/// last face is handed back as the error.
pub fn index_to_face(index: i8) -> Result<Option<Face>, i8> {
    if index < 0 {
        return Ok(None);
    }
    Face::from_index(i32::from(index)).map(Some).ok_or(index)
}

// ---------------------------------------------------------------------------
// FaceSet
// ---------------------------------------------------------------------------

/// A set of faces stored as a 6-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FaceSet(u8);

impl FaceSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b11_1111)
    }

    pub fn only(face: Face) -> Self {
        Self(1 << face.index())
    }

    /// Collect the faces for which `predicate` holds.
    pub fn from_fn(mut predicate: impl FnMut(Face) -> bool) -> Self {
        Face::ALL
            .into_iter()
            .filter(|&f| predicate(f))
            .fold(Self::empty(), Self::with)
    }

    #[must_use]
    pub fn with(self, face: Face) -> Self {
        Self(self.0 | (1 << face.index()))
    }

    #[must_use]
    pub fn without(self, face: Face) -> Self {
        Self(self.0 & !(1 << face.index()))
    }

    pub fn contains(self, face: Face) -> bool {
        self.0 & (1 << face.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Face> {
        Face::ALL.into_iter().filter(move |&f| self.contains(f))
    }
}

impl FromIterator<Face> for FaceSet {
    fn from_iter<I: IntoIterator<Item = Face>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_encoding_round_trips_negative_coordinates() {
        for pos in [
            Position::new(0, 0, 0),
            Position::new(-1, 64, -1),
            Position::new(30_000_000, 255, -30_000_000),
            Position::new(-33_554_432, -2048, 33_554_431),
        ] {
            assert_eq!(Position::from_long(pos.to_long()), pos);
        }
    }

    #[test]
    fn linear_encoding_layout() {
        assert_eq!(Position::new(0, 0, 1).to_long(), 1);
        assert_eq!(Position::new(0, 1, 0).to_long(), 1 << 26);
        assert_eq!(Position::new(1, 0, 0).to_long(), 1 << 38);
    }

    #[test]
    fn opposite_faces_cancel_offsets() {
        let origin = Position::new(3, 4, 5);
        for face in Face::ALL {
            assert_eq!(origin.offset(face).offset(face.opposite()), origin);
            assert_eq!(face.opposite().opposite(), face);
        }
    }

    #[test]
    fn face_index_round_trip() {
        for face in Face::ALL {
            assert_eq!(Face::from_index(face.index() as i32), Some(face));
        }
        assert_eq!(Face::from_index(-1), None);
        assert_eq!(Face::from_index(6), None);
        assert_eq!(face_to_index(None), -1);
        assert_eq!(face_to_index(Some(Face::East)), 5);
        assert_eq!(index_to_face(-1), Ok(None));
        assert_eq!(index_to_face(2), Ok(Some(Face::North)));
        assert_eq!(index_to_face(9), Err(9));
    }

    #[test]
    fn face_set_membership() {
        let set = FaceSet::only(Face::Up).with(Face::West);
        assert!(set.contains(Face::Up));
        assert!(set.contains(Face::West));
        assert!(!set.contains(Face::Down));
        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Face::Up, Face::West]);
        assert!(set.without(Face::Up).without(Face::West).is_empty());
        assert_eq!(FaceSet::all().len(), 6);
        assert_eq!(FaceSet::from_fn(|f| f == Face::South), FaceSet::only(Face::South));
    }
}
