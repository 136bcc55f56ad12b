// Geometry presets for the standard PC floppy formats

use serde::Serialize;

/// BPB parameters of one standard FAT12 floppy layout.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FormatPreset {
    pub key: &'static str,
    pub total_sectors: u16,
    pub media_descriptor: u8,
    pub sectors_per_cluster: u8,
    pub root_entries: u16,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
}

impl FormatPreset {
    pub fn total_bytes(&self) -> u64 {
        self.total_sectors as u64 * 512
    }
}

/// The eight standard FAT12 floppy layouts. All use 512-byte sectors, one
/// reserved sector, and two FAT copies.
pub const FORMATS: &[FormatPreset] = &[
    FormatPreset { key: "160k", total_sectors: 320, media_descriptor: 0xFE, sectors_per_cluster: 1, root_entries: 64, sectors_per_fat: 1, sectors_per_track: 8, num_heads: 1 },
    FormatPreset { key: "180k", total_sectors: 360, media_descriptor: 0xFC, sectors_per_cluster: 1, root_entries: 64, sectors_per_fat: 2, sectors_per_track: 9, num_heads: 1 },
    FormatPreset { key: "320k", total_sectors: 640, media_descriptor: 0xFF, sectors_per_cluster: 2, root_entries: 112, sectors_per_fat: 1, sectors_per_track: 8, num_heads: 2 },
    FormatPreset { key: "360k", total_sectors: 720, media_descriptor: 0xFD, sectors_per_cluster: 2, root_entries: 112, sectors_per_fat: 2, sectors_per_track: 9, num_heads: 2 },
    FormatPreset { key: "720k", total_sectors: 1440, media_descriptor: 0xF9, sectors_per_cluster: 2, root_entries: 112, sectors_per_fat: 3, sectors_per_track: 9, num_heads: 2 },
    FormatPreset { key: "1.2m", total_sectors: 2400, media_descriptor: 0xF9, sectors_per_cluster: 1, root_entries: 224, sectors_per_fat: 7, sectors_per_track: 15, num_heads: 2 },
    FormatPreset { key: "1.44m", total_sectors: 2880, media_descriptor: 0xF0, sectors_per_cluster: 1, root_entries: 224, sectors_per_fat: 9, sectors_per_track: 18, num_heads: 2 },
    FormatPreset { key: "2.88m", total_sectors: 5760, media_descriptor: 0xF0, sectors_per_cluster: 2, root_entries: 240, sectors_per_fat: 9, sectors_per_track: 36, num_heads: 2 },
];

/// Look a preset up by key, case-insensitively.
pub fn lookup(key: &str) -> Option<&'static FormatPreset> {
    FORMATS.iter().find(|preset| preset.key.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(lookup("1.44M").unwrap().total_sectors, 2880);
        assert!(lookup("5.25m").is_none());
    }

    #[test]
    fn test_every_preset_is_fat12_sized() {
        for preset in FORMATS {
            // Well under the 4085-cluster FAT12 ceiling
            let clusters = preset.total_sectors as u32 / preset.sectors_per_cluster as u32;
            assert!(clusters < 4085, "{} is not FAT12-sized", preset.key);
        }
    }
}
