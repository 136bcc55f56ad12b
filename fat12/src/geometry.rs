// Boot sector (BPB/EBPB) parsing and derived volume layout
// All region offsets the engine uses are computed once here, at open time.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use diskette_core::{DisketteError, FormatError};
use log::warn;
use serde::Serialize;

pub const SECTOR_SIZE: usize = 512;
pub const DIR_ENTRY_SIZE: usize = 32;

// Microsoft cluster-count thresholds for FAT type detection
const FAT12_MAX_CLUSTERS: u32 = 4085;
const FAT16_MAX_CLUSTERS: u32 = 65525;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn name(&self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }
}

/// Parsed boot sector plus the derived byte layout of the volume.
/// Immutable after load; owned by the volume handle.
#[derive(Debug, Clone)]
pub struct VolumeGeometry {
    // BPB fields
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,

    // EBPB fields
    pub drive_number: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type_label: [u8; 8],

    // Derived layout
    pub fat_offset: u64,
    pub fat_size_bytes: u64,
    pub root_offset: u64,
    pub root_size_bytes: u64,
    pub data_offset: u64,
    pub bytes_per_cluster: u32,
    pub total_clusters: u16,
    pub fat_type: FatType,
}

impl VolumeGeometry {
    /// Parse the first 512 bytes of an image.
    pub fn parse(bytes: &[u8]) -> Result<Self, DisketteError> {
        if bytes.len() < SECTOR_SIZE {
            return Err(FormatError::BootSectorTooSmall { len: bytes.len() }.into());
        }

        // Jump instruction is EB xx 90 or E9 xx xx on anything DOS-formatted
        if bytes[0] != 0xEB && bytes[0] != 0xE9 {
            return Err(FormatError::InvalidBootSector {
                reason: format!("bad jump instruction: {:#04x}", bytes[0]),
            }
            .into());
        }
        if bytes[510] != 0x55 || bytes[511] != 0xAA {
            return Err(FormatError::InvalidBootSector {
                reason: "missing 0x55AA signature".into(),
            }
            .into());
        }

        let mut cursor = Cursor::new(&bytes[11..]);
        let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_cluster = cursor.read_u8()?;
        let reserved_sectors = cursor.read_u16::<LittleEndian>()?;
        let num_fats = cursor.read_u8()?;
        let root_entries = cursor.read_u16::<LittleEndian>()?;
        let total_sectors_16 = cursor.read_u16::<LittleEndian>()?;
        let media_descriptor = cursor.read_u8()?;
        let sectors_per_fat = cursor.read_u16::<LittleEndian>()?;
        let sectors_per_track = cursor.read_u16::<LittleEndian>()?;
        let num_heads = cursor.read_u16::<LittleEndian>()?;
        let hidden_sectors = cursor.read_u32::<LittleEndian>()?;
        let total_sectors_32 = cursor.read_u32::<LittleEndian>()?;

        if bytes_per_sector == 0 || bytes_per_sector > 4096 {
            return Err(FormatError::InvalidBootSector {
                reason: format!("invalid bytes per sector: {}", bytes_per_sector),
            }
            .into());
        }
        if sectors_per_cluster == 0 {
            return Err(FormatError::InvalidBootSector {
                reason: "sectors per cluster is 0".into(),
            }
            .into());
        }
        if num_fats == 0 {
            return Err(FormatError::InvalidBootSector {
                reason: "number of FATs is 0".into(),
            }
            .into());
        }
        if sectors_per_fat == 0 {
            return Err(FormatError::InvalidBootSector {
                reason: "sectors per FAT is 0".into(),
            }
            .into());
        }

        let total_sectors = if total_sectors_16 != 0 {
            total_sectors_16 as u32
        } else {
            total_sectors_32
        };

        let mut oem_name = [0u8; 8];
        oem_name.copy_from_slice(&bytes[3..11]);

        let drive_number = bytes[36];
        let boot_signature = bytes[38];
        let volume_id = u32::from_le_bytes([bytes[39], bytes[40], bytes[41], bytes[42]]);
        let mut volume_label = [0u8; 11];
        volume_label.copy_from_slice(&bytes[43..54]);
        let mut fs_type_label = [0u8; 8];
        fs_type_label.copy_from_slice(&bytes[54..62]);

        // Derived layout
        let bps = bytes_per_sector as u64;
        let fat_offset = reserved_sectors as u64 * bps;
        let fat_size_bytes = sectors_per_fat as u64 * bps;
        let root_offset = fat_offset + num_fats as u64 * fat_size_bytes;
        let root_size_bytes = root_entries as u64 * DIR_ENTRY_SIZE as u64;
        let data_offset = root_offset + root_size_bytes;
        let bytes_per_cluster = bytes_per_sector as u32 * sectors_per_cluster as u32;

        let data_sectors =
            (total_sectors as u64).saturating_sub(data_offset / bps) as u32;
        let cluster_count = data_sectors / sectors_per_cluster as u32;

        let fat_type = if cluster_count < FAT12_MAX_CLUSTERS {
            FatType::Fat12
        } else if cluster_count < FAT16_MAX_CLUSTERS {
            FatType::Fat16
        } else {
            FatType::Fat32
        };
        if fat_type != FatType::Fat12 {
            warn!(
                "detected {} ({} clusters); only FAT12 data semantics are supported",
                fat_type.name(),
                cluster_count
            );
        }

        Ok(Self {
            oem_name,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            root_entries,
            total_sectors,
            media_descriptor,
            sectors_per_fat,
            sectors_per_track,
            num_heads,
            hidden_sectors,
            drive_number,
            boot_signature,
            volume_id,
            volume_label,
            fs_type_label,
            fat_offset,
            fat_size_bytes,
            root_offset,
            root_size_bytes,
            data_offset,
            bytes_per_cluster,
            total_clusters: cluster_count.min(u16::MAX as u32) as u16,
            fat_type,
        })
    }

    /// Byte offset of a data cluster. Clusters are numbered from 2.
    pub fn cluster_offset(&self, cluster: u16) -> u64 {
        self.data_offset + (cluster as u64 - 2) * self.bytes_per_cluster as u64
    }

    /// True when `cluster` addresses an existing data cluster.
    pub fn is_valid_cluster(&self, cluster: u16) -> bool {
        cluster >= 2 && (cluster as u32) < self.total_clusters as u32 + 2
    }

    /// Directory slots held by one cluster.
    pub fn slots_per_cluster(&self) -> usize {
        self.bytes_per_cluster as usize / DIR_ENTRY_SIZE
    }

    /// EBPB volume label, trimmed; `None` when unset.
    pub fn label(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.volume_label);
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "NO NAME" {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
