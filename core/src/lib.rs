pub mod error;
pub mod image;

pub use error::{CorruptionError, DisketteError, FormatError};
pub use image::ImageFile;
