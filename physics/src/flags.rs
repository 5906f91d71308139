//! Collision category/mask bitfields.
//!
//! Geometries carry a category bitmask ("what I am") and a collide bitmask
//! ("what I hit"). A pair survives filtering when either side's collide mask
//! intersects the other side's categories.

use num_traits::{One, PrimInt};

/// Trait implemented by flag enums.
///
/// The enum's discriminant (via `#[repr(u8)]`) determines the bit index.
/// The backing integer type is chosen via the associated `Storage`.
pub trait FlagBitmask {
    type Storage: PrimInt;

    fn bit_index(&self) -> u8;

    fn mask(&self) -> Self::Storage {
        // Equivalent to: 1 << index
        // NOTE: Ensure your `bit_index()` is < number of bits in `Storage`.
        Self::Storage::one() << (self.bit_index() as usize)
    }
}

/// A pure bitmask container.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bitmask<T: PrimInt> {
    pub bits: T,
}

impl<T: PrimInt> Bitmask<T> {
    pub fn empty() -> Self {
        Self { bits: T::zero() }
    }

    pub fn add<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits | tag.mask();
    }

    pub fn remove<U: FlagBitmask<Storage = T>>(&mut self, tag: U) {
        self.bits = self.bits & !tag.mask();
    }

    pub fn has<U: FlagBitmask<Storage = T>>(&self, tag: U) -> bool {
        (self.bits & tag.mask()) != T::zero()
    }

    pub fn with<U: FlagBitmask<Storage = T> + Copy>(tags: &[U]) -> Self {
        let mut out = Self::empty();
        for &tag in tags {
            out.add(tag);
        }
        out
    }

    /// True when any bit is shared with `other`.
    pub fn intersects(&self, other: &Self) -> bool {
        (self.bits & other.bits) != T::zero()
    }

    pub fn clear(&mut self) {
        self.bits = T::zero();
    }
}

/// Declare a bitmask-backed enum and implement `FlagBitmask` for it.
#[macro_export]
macro_rules! define_bitmask_flags {
    ($name:ident, $storage:ty, { $($variant:ident),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum $name {
            $($variant),*
        }

        impl $crate::flags::FlagBitmask for $name {
            type Storage = $storage;

            fn bit_index(&self) -> u8 {
                *self as u8
            }
        }
    };
}

// Geom: plain geometry (every geom carries this). Body: geometry attached
// to a dynamics body. Space: broad-phase container, matched by selected-prim
// masks. Character: avatar capsule shell. Land: terrain heightfield.
// Wind: wind force volume. Sensor: non-solid overlay. Selected: held by
// an editor selection.
define_bitmask_flags!(CollisionCategory, u32, {
    Geom,
    Body,
    Space,
    Character,
    Land,
    Wind,
    Sensor,
    Selected,
});

/// Convenience alias: all collision bitfields are 32-bit.
pub type CollisionBits = Bitmask<u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_round_trip() {
        // Adding then removing a tag restores the original bits.
        let mut m = CollisionBits::empty();
        m.add(CollisionCategory::Geom);
        let before = m;
        m.add(CollisionCategory::Body);
        m.remove(CollisionCategory::Body);
        assert_eq!(m, before);
    }

    #[test]
    fn intersects_requires_shared_bit() {
        let a = CollisionBits::with(&[CollisionCategory::Geom, CollisionCategory::Body]);
        let b = CollisionBits::with(&[CollisionCategory::Land]);
        let c = CollisionBits::with(&[CollisionCategory::Body, CollisionCategory::Land]);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(b.intersects(&c));
    }

    #[test]
    fn distinct_categories_get_distinct_masks() {
        use crate::flags::FlagBitmask;
        let all = [
            CollisionCategory::Geom,
            CollisionCategory::Body,
            CollisionCategory::Space,
            CollisionCategory::Character,
            CollisionCategory::Land,
            CollisionCategory::Wind,
            CollisionCategory::Sensor,
            CollisionCategory::Selected,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a.mask(), b.mask());
            }
        }
    }
}
