//! Alignment-1 byte-order wrapper types.
//!
//! Each wrapper stores its value pre-converted into the target byteorder as a
//! byte array rather than a native integer, so the wrapper's own alignment is
//! always 1. That lets it sit inside a `#[repr(C)]` packet header cast
//! straight out of an arbitrarily-offset byte buffer without ever tripping
//! the unaligned-access assertion in [`crate::bytes::cast`].

use crate::bytes::{Cast, Unaligned};

macro_rules! define_wrapper {
	($name:ident, $int:ty, $n:literal, $to:ident, $from:ident, $doc:literal) => {
		#[doc = $doc]
		#[repr(transparent)]
		#[derive(Clone, Copy, Default, PartialEq, Eq)]
		pub struct $name([u8; $n]);

		impl $name {
			#[inline]
			pub const fn new(v: $int) -> Self {
				Self(v.$to())
			}

			#[inline]
			pub const fn get(self) -> $int {
				<$int>::$from(self.0)
			}
		}

		impl From<$int> for $name {
			#[inline]
			fn from(v: $int) -> Self {
				Self::new(v)
			}
		}

		impl core::fmt::Debug for $name {
			fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
				self.get().fmt(f)
			}
		}

		unsafe impl Cast for $name {}
		unsafe impl Unaligned for $name {}
	};
}

define_wrapper!(u16be, u16, 2, to_be_bytes, from_be_bytes, "A `u16` stored in big-endian (network) byteorder.");
define_wrapper!(u32be, u32, 4, to_be_bytes, from_be_bytes, "A `u32` stored in big-endian (network) byteorder.");
define_wrapper!(
	u16ne,
	u16,
	2,
	to_ne_bytes,
	from_ne_bytes,
	"A `u16` stored in native byteorder, for fields the wire format deliberately leaves unswapped."
);
