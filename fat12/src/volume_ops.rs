// Whole-volume operations: format and empty-image creation

use std::path::Path;

use diskette_core::{DisketteError, FormatError, ImageFile};
use log::info;

use crate::formats::{self, FormatPreset};
use crate::volume::Fat12Volume;

// Boot sector field offsets, per the standard BPB/EBPB layout
const BS_JMP_BOOT: usize = 0;
const BS_OEM_NAME: usize = 3;
const BPB_BYTES_PER_SEC: usize = 11;
const BPB_SEC_PER_CLUS: usize = 13;
const BPB_RSVD_SEC_CNT: usize = 14;
const BPB_NUM_FATS: usize = 16;
const BPB_ROOT_ENT_CNT: usize = 17;
const BPB_TOT_SEC16: usize = 19;
const BPB_MEDIA: usize = 21;
const BPB_FAT_SZ16: usize = 22;
const BPB_SEC_PER_TRK: usize = 24;
const BPB_NUM_HEADS: usize = 26;
const BPB_HIDD_SEC: usize = 28;
const BS_DRV_NUM: usize = 36;
const BS_BOOT_SIG: usize = 38;
const BS_VOL_ID: usize = 39;
const BS_VOL_LAB: usize = 43;
const BS_FIL_SYS_TYPE: usize = 54;
const BOOT_SIGNATURE_OFFSET: usize = 510;

impl Fat12Volume {
    /// Reinitialize the volume: zero the root directory and rebuild every
    /// FAT copy. A full format also zeroes the whole data region.
    pub fn format(&mut self, full: bool) -> Result<(), DisketteError> {
        let root_offset = self.geometry().root_offset;
        let root_size = self.geometry().root_size_bytes;
        let data_offset = self.geometry().data_offset;
        let fat_size = self.geometry().fat_size_bytes as usize;
        let media_descriptor = self.geometry().media_descriptor;
        let total_bytes =
            self.geometry().total_sectors as u64 * self.geometry().bytes_per_sector as u64;

        info!(
            "formatting {} (full={})",
            self.image_mut().path().display(),
            full
        );
        self.image_mut().zero_range(root_offset, root_size)?;

        let mut fat_buffer = vec![0u8; fat_size];
        fat_buffer[0] = media_descriptor;
        fat_buffer[1] = 0xFF;
        fat_buffer[2] = 0xFF;
        // Rewrites every copy and verifies each by re-reading
        self.write_fat(&fat_buffer)?;

        if full {
            let data_len = total_bytes.saturating_sub(data_offset);
            self.image_mut().zero_range(data_offset, data_len)?;
        }
        self.image_mut().flush()?;
        Ok(())
    }
}

/// Build a FAT12 boot sector field by field from a format preset.
pub(crate) fn build_boot_sector(
    preset: &FormatPreset,
    oem_name: Option<&str>,
    volume_id: u32,
) -> [u8; 512] {
    let mut boot = [0u8; 512];

    boot[BS_JMP_BOOT] = 0xEB;
    boot[BS_JMP_BOOT + 1] = 0x3C;
    boot[BS_JMP_BOOT + 2] = 0x90;

    let mut oem = [0x20u8; 8];
    for (i, byte) in oem_name.unwrap_or("MSWIN4.1").bytes().take(8).enumerate() {
        oem[i] = byte;
    }
    boot[BS_OEM_NAME..BS_OEM_NAME + 8].copy_from_slice(&oem);

    boot[BPB_BYTES_PER_SEC..BPB_BYTES_PER_SEC + 2].copy_from_slice(&512u16.to_le_bytes());
    boot[BPB_SEC_PER_CLUS] = preset.sectors_per_cluster;
    boot[BPB_RSVD_SEC_CNT..BPB_RSVD_SEC_CNT + 2].copy_from_slice(&1u16.to_le_bytes());
    boot[BPB_NUM_FATS] = 2;
    boot[BPB_ROOT_ENT_CNT..BPB_ROOT_ENT_CNT + 2]
        .copy_from_slice(&preset.root_entries.to_le_bytes());
    boot[BPB_TOT_SEC16..BPB_TOT_SEC16 + 2].copy_from_slice(&preset.total_sectors.to_le_bytes());
    boot[BPB_MEDIA] = preset.media_descriptor;
    boot[BPB_FAT_SZ16..BPB_FAT_SZ16 + 2].copy_from_slice(&preset.sectors_per_fat.to_le_bytes());
    boot[BPB_SEC_PER_TRK..BPB_SEC_PER_TRK + 2]
        .copy_from_slice(&preset.sectors_per_track.to_le_bytes());
    boot[BPB_NUM_HEADS..BPB_NUM_HEADS + 2].copy_from_slice(&preset.num_heads.to_le_bytes());
    boot[BPB_HIDD_SEC..BPB_HIDD_SEC + 4].copy_from_slice(&0u32.to_le_bytes());

    boot[BS_DRV_NUM] = 0x00; // removable media
    boot[BS_BOOT_SIG] = 0x29;
    boot[BS_VOL_ID..BS_VOL_ID + 4].copy_from_slice(&volume_id.to_le_bytes());
    boot[BS_VOL_LAB..BS_VOL_LAB + 11].copy_from_slice(b"NO NAME    ");
    boot[BS_FIL_SYS_TYPE..BS_FIL_SYS_TYPE + 8].copy_from_slice(b"FAT12   ");

    boot[BOOT_SIGNATURE_OFFSET] = 0x55;
    boot[BOOT_SIGNATURE_OFFSET + 1] = 0xAA;
    boot
}

/// Create a blank, formatted image of the given preset at `path`.
pub fn create_empty_image<P: AsRef<Path>>(
    path: P,
    format_key: &str,
    oem_name: Option<&str>,
) -> Result<(), DisketteError> {
    let preset = formats::lookup(format_key).ok_or_else(|| FormatError::UnknownFormat {
        key: format_key.to_string(),
    })?;
    info!(
        "creating {} image at {}",
        preset.key,
        path.as_ref().display()
    );

    let mut image = ImageFile::create(&path, preset.total_bytes())?;
    let boot = build_boot_sector(preset, oem_name, rand::random());
    image.write_at(0, &boot)?;

    // One reserved sector, then the FAT copies; each starts with the media
    // descriptor and the two reserved entries.
    let fat_size = preset.sectors_per_fat as u64 * 512;
    for copy in 0..2u64 {
        image.write_at(512 + copy * fat_size, &[preset.media_descriptor, 0xFF, 0xFF])?;
    }
    image.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_empty_image(dir.path().join("x.img"), "8inch", None).unwrap_err();
        match err {
            DisketteError::Format(FormatError::UnknownFormat { key }) => {
                assert_eq!(key, "8inch")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_boot_sector_carries_preset_fields() {
        let preset = formats::lookup("720k").unwrap();
        let boot = build_boot_sector(preset, Some("TESTOEM"), 42);
        assert_eq!(&boot[3..11], b"TESTOEM ");
        assert_eq!(u16::from_le_bytes([boot[19], boot[20]]), 1440);
        assert_eq!(boot[21], 0xF9);
        assert_eq!(boot[38], 0x29);
        assert_eq!(&boot[510..512], &[0x55, 0xAA]);
    }
}
