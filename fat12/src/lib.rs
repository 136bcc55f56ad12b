// FAT12/VFAT floppy-image engine: boot sector geometry, the 12-bit FAT,
// VFAT long filenames over 8.3 entries, and file/directory operations
// working directly against raw image bytes.

pub mod defrag;
pub mod dir;
pub mod fat;
pub mod file_ops;
pub mod formats;
pub mod geometry;
pub mod long_names;
pub mod shortname;
pub mod timestamps;
pub mod volume;
pub mod volume_ops;

pub use diskette_core::{CorruptionError, DisketteError, FormatError};

pub use dir::{Attributes, DirEntry, DirLocation};
pub use fat::{classify, FatEntryClass};
pub use file_ops::{AttributeEdit, WriteOptions};
pub use formats::{FormatPreset, FORMATS};
pub use geometry::{FatType, VolumeGeometry};
pub use volume::Fat12Volume;
pub use volume_ops::create_empty_image;
