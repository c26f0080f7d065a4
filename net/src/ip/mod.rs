mod checksum;

pub mod v4;

pub use checksum::Checksum;
