use thiserror::Error;

/// Recoverable errors: the image is structurally sound but the requested
/// operation cannot be carried out as asked.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("boot sector is {len} bytes, need at least 512")]
    BootSectorTooSmall { len: usize },

    #[error("invalid boot sector: {reason}")]
    InvalidBootSector { reason: String },

    #[error("FAT write verification failed on copy {copy}")]
    FatWriteVerification { copy: u8 },

    #[error("no run of {needed} free directory slots available")]
    DirectoryFull { needed: usize },

    #[error("not enough free clusters: need {needed}, found {found}")]
    DiskFull { needed: usize, found: usize },

    #[error("an entry named '{name}' already exists")]
    NameCollision { name: String },

    #[error("directory is not empty")]
    DirectoryNotEmpty,

    #[error("unknown image format key: {key}")]
    UnknownFormat { key: String },
}

/// On-disk inconsistencies. Fatal to the current operation and never
/// silently repaired.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorruptionError {
    #[error("cluster chain cycles back through cluster {cluster}")]
    ChainCycle { cluster: u16 },

    #[error("cluster chain ended after {read} of {expected} bytes")]
    TruncatedChain { expected: u32, read: u32 },

    #[error("cycle while scanning backward from cluster {cluster}")]
    BackwardScanCycle { cluster: u16 },
}

#[derive(Debug, Error)]
pub enum DisketteError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Corruption(#[from] CorruptionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DisketteError {
    /// True when the error reports on-disk corruption rather than a
    /// recoverable condition.
    pub fn is_corruption(&self) -> bool {
        matches!(self, DisketteError::Corruption(_))
    }
}
