// Directory engine: 32-byte slot addressing, entry parsing with LFN
// reconstruction, free-slot search, and entry-group mutation.
//
// The root directory is a fixed array between the FATs and the data area and
// can never grow; subdirectories live in cluster chains and are extended on
// demand.

use std::collections::HashSet;

use bitflags::bitflags;
use chrono::{NaiveDate, NaiveDateTime};
use diskette_core::{DisketteError, FormatError};
use log::{debug, warn};
use serde::Serialize;

use crate::fat::{self, FatEntryClass, FAT12_EOC};
use crate::geometry::DIR_ENTRY_SIZE;
use crate::long_names::{build_lfn_entries, LfnAccumulator, LFN_ATTR};
use crate::shortname::{generate_short_name, needs_lfn, parse_short_name};
use crate::timestamps;
use crate::volume::Fat12Volume;

pub const ENTRY_END: u8 = 0x00;
pub const ENTRY_DELETED: u8 = 0xE5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// Where a directory's slots live: the fixed root region or a cluster chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DirLocation {
    Root,
    Cluster(u16),
}

/// A parsed view of one directory entry. Reconstructed from raw bytes on
/// every read; never the source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub long_name: Option<String>,
    pub short_name: String,
    pub raw_name: [u8; 11],
    pub attributes: Attributes,
    pub size: u32,
    pub first_cluster: u32,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub accessed: Option<NaiveDate>,
    /// Slot index of the short entry within its directory.
    pub index: usize,
    /// Index of the first slot of the entry group (LFN fragments included).
    pub first_slot: usize,
    pub location: DirLocation,
    /// The raw 32 short-entry bytes, kept so rename and defragmentation can
    /// carry non-name fields over bit-for-bit.
    pub raw: [u8; 32],
}

impl DirEntry {
    pub(crate) fn from_raw(
        slot: &[u8],
        index: usize,
        first_slot: usize,
        long_name: Option<String>,
        location: DirLocation,
    ) -> Self {
        let mut raw_name = [0u8; 11];
        raw_name.copy_from_slice(&slot[0..11]);
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&slot[0..32]);

        let creation_time = u16::from_le_bytes([slot[14], slot[15]]);
        let creation_date = u16::from_le_bytes([slot[16], slot[17]]);
        let access_date = u16::from_le_bytes([slot[18], slot[19]]);
        let cluster_high = u16::from_le_bytes([slot[20], slot[21]]);
        let write_time = u16::from_le_bytes([slot[22], slot[23]]);
        let write_date = u16::from_le_bytes([slot[24], slot[25]]);
        let cluster_low = u16::from_le_bytes([slot[26], slot[27]]);
        let size = u32::from_le_bytes([slot[28], slot[29], slot[30], slot[31]]);

        Self {
            long_name,
            short_name: parse_short_name(&raw_name),
            raw_name,
            attributes: Attributes::from_bits_truncate(slot[11]),
            size,
            // high word only ever non-zero on FAT32 volumes; kept for
            // completeness, write paths persist the low word alone
            first_cluster: ((cluster_high as u32) << 16) | cluster_low as u32,
            created: timestamps::decode_datetime(creation_date, creation_time),
            modified: timestamps::decode_datetime(write_date, write_time),
            accessed: timestamps::decode_date(access_date),
            index,
            first_slot,
            location,
            raw,
        }
    }

    /// Display name: the long name when one is bound, the 8.3 name otherwise.
    pub fn name(&self) -> &str {
        self.long_name.as_deref().unwrap_or(&self.short_name)
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    pub fn is_dot(&self) -> bool {
        self.short_name == "." || self.short_name == ".."
    }

    /// First cluster as the 12-bit-addressable index the FAT12 engine uses.
    pub fn first_cluster_u16(&self) -> u16 {
        (self.first_cluster & 0xFFFF) as u16
    }

    /// Slots occupied by this entry group.
    pub fn slot_span(&self) -> usize {
        self.index - self.first_slot + 1
    }
}

/// Assemble the raw 32 bytes of a short entry.
pub(crate) fn build_short_entry(
    raw_name: [u8; 11],
    attributes: u8,
    first_cluster: u16,
    size: u32,
    created: NaiveDateTime,
    modified: NaiveDateTime,
) -> [u8; 32] {
    let (creation_date, creation_time) = timestamps::encode_datetime(created);
    let (write_date, write_time) = timestamps::encode_datetime(modified);

    let mut entry = [0u8; 32];
    entry[0..11].copy_from_slice(&raw_name);
    entry[11] = attributes;
    // [12] NT reserved, [13] creation tenths
    entry[14..16].copy_from_slice(&creation_time.to_le_bytes());
    entry[16..18].copy_from_slice(&creation_date.to_le_bytes());
    entry[18..20].copy_from_slice(&write_date.to_le_bytes());
    // [20:22] cluster high word stays zero on FAT12
    entry[22..24].copy_from_slice(&write_time.to_le_bytes());
    entry[24..26].copy_from_slice(&write_date.to_le_bytes());
    entry[26..28].copy_from_slice(&first_cluster.to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

impl Fat12Volume {
    /// Clusters of a directory chain, in order. A chain cycle truncates the
    /// list with a warning so listings degrade instead of failing.
    pub(crate) fn dir_clusters(&mut self, start: u16) -> Result<Vec<u16>, DisketteError> {
        let total_clusters = self.geometry().total_clusters;
        let fat_buffer = self.read_fat()?;

        let mut clusters = Vec::new();
        let mut visited = HashSet::new();
        let mut current = start;
        loop {
            if current < 2 || current as u32 >= total_clusters as u32 + 2 {
                break;
            }
            if !visited.insert(current) {
                warn!(
                    "directory chain cycles at cluster {}; listing truncated",
                    current
                );
                break;
            }
            clusters.push(current);
            let next = fat::get_entry(&fat_buffer, current);
            match fat::classify(next) {
                FatEntryClass::Used => current = next,
                _ => break,
            }
        }
        Ok(clusters)
    }

    /// Absolute byte offset of every slot in the directory, in index order.
    pub(crate) fn dir_slot_offsets(
        &mut self,
        location: DirLocation,
    ) -> Result<Vec<u64>, DisketteError> {
        match location {
            DirLocation::Root => {
                let root_offset = self.geometry().root_offset;
                let root_entries = self.geometry().root_entries as u64;
                Ok((0..root_entries)
                    .map(|i| root_offset + i * DIR_ENTRY_SIZE as u64)
                    .collect())
            }
            DirLocation::Cluster(start) => {
                let slots_per_cluster = self.geometry().slots_per_cluster() as u64;
                let clusters = self.dir_clusters(start)?;
                let mut offsets = Vec::with_capacity(clusters.len() * slots_per_cluster as usize);
                for cluster in clusters {
                    let base = self.geometry().cluster_offset(cluster);
                    for slot in 0..slots_per_cluster {
                        offsets.push(base + slot * DIR_ENTRY_SIZE as u64);
                    }
                }
                Ok(offsets)
            }
        }
    }

    /// All slot bytes of the directory, concatenated in index order.
    pub(crate) fn read_dir_raw(&mut self, location: DirLocation) -> Result<Vec<u8>, DisketteError> {
        match location {
            DirLocation::Root => {
                let root_offset = self.geometry().root_offset;
                let root_size = self.geometry().root_size_bytes as usize;
                self.image_mut().read_at(root_offset, root_size)
            }
            DirLocation::Cluster(start) => {
                let bytes_per_cluster = self.geometry().bytes_per_cluster as usize;
                let clusters = self.dir_clusters(start)?;
                let mut raw = Vec::with_capacity(clusters.len() * bytes_per_cluster);
                for cluster in clusters {
                    let offset = self.geometry().cluster_offset(cluster);
                    raw.extend_from_slice(&self.image_mut().read_at(offset, bytes_per_cluster)?);
                }
                Ok(raw)
            }
        }
    }

    /// Parse every live entry of a directory, reconstructing long names from
    /// the LFN fragments preceding each short entry.
    pub fn read_directory(&mut self, location: DirLocation) -> Result<Vec<DirEntry>, DisketteError> {
        let raw = self.read_dir_raw(location)?;
        let mut entries = Vec::new();
        let mut lfn = LfnAccumulator::new();

        for index in 0..raw.len() / DIR_ENTRY_SIZE {
            let slot = &raw[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE];
            let first_byte = slot[0];
            if first_byte == ENTRY_END {
                break;
            }
            if first_byte == ENTRY_DELETED {
                lfn.reset();
                continue;
            }
            let attribute_byte = slot[11];
            if attribute_byte == LFN_ATTR {
                lfn.push(slot);
                continue;
            }
            if attribute_byte & Attributes::VOLUME_LABEL.bits() != 0 {
                continue;
            }

            let mut raw_name = [0u8; 11];
            raw_name.copy_from_slice(&slot[0..11]);
            let pending = lfn.pending();
            let long_name = lfn.take(&raw_name);
            let first_slot = if long_name.is_some() {
                index - pending
            } else {
                index
            };
            entries.push(DirEntry::from_raw(slot, index, first_slot, long_name, location));
        }
        Ok(entries)
    }

    /// Find (or make) a contiguous run of `needed` free slots, returning its
    /// start index.
    ///
    /// The root region is fixed and fails with `DirectoryFull` when no run
    /// fits. A subdirectory grows its cluster chain instead and only fails
    /// when the disk is out of free clusters.
    pub(crate) fn find_free_slots(
        &mut self,
        location: DirLocation,
        needed: usize,
    ) -> Result<usize, DisketteError> {
        let raw = self.read_dir_raw(location)?;
        let capacity = raw.len() / DIR_ENTRY_SIZE;
        let slot_is_free = |index: usize| {
            let byte = raw[index * DIR_ENTRY_SIZE];
            byte == ENTRY_END || byte == ENTRY_DELETED
        };

        let mut run = 0;
        for index in 0..capacity {
            if slot_is_free(index) {
                run += 1;
                if run == needed {
                    return Ok(index + 1 - needed);
                }
            } else {
                run = 0;
            }
        }

        let start = match location {
            DirLocation::Root => {
                return Err(FormatError::DirectoryFull { needed }.into());
            }
            DirLocation::Cluster(start) => start,
        };

        // Grow the chain; the trailing free run carries over into the new
        // clusters.
        let trailing = (0..capacity).rev().take_while(|&i| slot_is_free(i)).count();
        let slots_per_cluster = self.geometry().slots_per_cluster();
        let bytes_per_cluster = self.geometry().bytes_per_cluster as u64;
        let total_clusters = self.geometry().total_clusters;
        let extra_clusters = (needed - trailing + slots_per_cluster - 1) / slots_per_cluster;

        let mut fat_buffer = self.read_fat()?;
        let new_clusters = fat::find_free(&fat_buffer, total_clusters, Some(extra_clusters));
        if new_clusters.len() < extra_clusters {
            return Err(FormatError::DiskFull {
                needed: extra_clusters,
                found: new_clusters.len(),
            }
            .into());
        }

        let chain = self.dir_clusters(start)?;
        let mut tail = match chain.last() {
            Some(&last) => last,
            None => start,
        };
        for &cluster in &new_clusters {
            fat::set_entry(&mut fat_buffer, tail, cluster);
            fat::set_entry(&mut fat_buffer, cluster, FAT12_EOC);
            tail = cluster;
        }
        for &cluster in &new_clusters {
            let offset = self.geometry().cluster_offset(cluster);
            self.image_mut().zero_range(offset, bytes_per_cluster)?;
        }
        self.write_fat(&fat_buffer)?;
        debug!(
            "grew directory at cluster {} by {} cluster(s)",
            start, extra_clusters
        );
        Ok(capacity - trailing)
    }

    /// Write an entry group — LFN fragments followed by the short entry — at
    /// sequential slots starting at `start`.
    pub(crate) fn write_slots(
        &mut self,
        location: DirLocation,
        start: usize,
        lfn_entries: &[[u8; 32]],
        short_entry: &[u8; 32],
    ) -> Result<(), DisketteError> {
        let offsets = self.dir_slot_offsets(location)?;
        for (i, entry) in lfn_entries.iter().chain(std::iter::once(short_entry)).enumerate() {
            self.image_mut().write_at(offsets[start + i], entry)?;
        }
        Ok(())
    }

    /// Mark the short entry at `index` deleted, then sweep backward over its
    /// LFN fragments, stopping at the first non-LFN slot.
    pub(crate) fn delete_entry_slots(
        &mut self,
        location: DirLocation,
        index: usize,
    ) -> Result<(), DisketteError> {
        let offsets = self.dir_slot_offsets(location)?;
        self.image_mut().write_at(offsets[index], &[ENTRY_DELETED])?;

        let mut i = index;
        while i > 0 {
            i -= 1;
            let slot = self.image_mut().read_at(offsets[i], DIR_ENTRY_SIZE)?;
            if slot[11] == LFN_ATTR && slot[0] != ENTRY_DELETED && slot[0] != ENTRY_END {
                self.image_mut().write_at(offsets[i], &[ENTRY_DELETED])?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Mark a range of slots deleted (used to undo a reservation or retire
    /// the leading slots of a shrunk entry group).
    pub(crate) fn mark_slots_deleted(
        &mut self,
        location: DirLocation,
        range: std::ops::Range<usize>,
    ) -> Result<(), DisketteError> {
        let offsets = self.dir_slot_offsets(location)?;
        for index in range {
            self.image_mut().write_at(offsets[index], &[ENTRY_DELETED])?;
        }
        Ok(())
    }

    /// Zero a fresh directory cluster and write its `.` and `..` entries.
    pub(crate) fn initialize_subdirectory(
        &mut self,
        cluster: u16,
        parent: DirLocation,
    ) -> Result<(), DisketteError> {
        let offset = self.geometry().cluster_offset(cluster);
        let bytes_per_cluster = self.geometry().bytes_per_cluster as u64;
        self.image_mut().zero_range(offset, bytes_per_cluster)?;

        let now = timestamps::now();
        let parent_cluster = match parent {
            DirLocation::Root => 0,
            DirLocation::Cluster(c) => c,
        };
        let dot = build_short_entry(
            *b".          ",
            Attributes::DIRECTORY.bits(),
            cluster,
            0,
            now,
            now,
        );
        let dotdot = build_short_entry(
            *b"..         ",
            Attributes::DIRECTORY.bits(),
            parent_cluster,
            0,
            now,
            now,
        );
        self.image_mut().write_at(offset, &dot)?;
        self.image_mut().write_at(offset + DIR_ENTRY_SIZE as u64, &dotdot)?;
        Ok(())
    }

    /// Rename an entry in place when the new name needs no more slots than
    /// the old one, otherwise relocate the whole group to a fresh run.
    /// Cluster, size, and every timestamp field carry over bit-for-bit.
    pub fn rename(
        &mut self,
        entry: &DirEntry,
        new_name: &str,
        use_numeric_tail: bool,
    ) -> Result<(), DisketteError> {
        let entries = self.read_directory(entry.location)?;
        if entries
            .iter()
            .any(|e| e.index != entry.index && e.name().eq_ignore_ascii_case(new_name))
        {
            return Err(FormatError::NameCollision {
                name: new_name.to_string(),
            }
            .into());
        }

        // The entry's own short name never counts as a collision.
        let existing: Vec<[u8; 11]> = entries
            .iter()
            .filter(|e| e.index != entry.index)
            .map(|e| e.raw_name)
            .collect();
        let short_raw = generate_short_name(new_name, &existing, use_numeric_tail);
        let lfn_entries = if needs_lfn(new_name) {
            build_lfn_entries(new_name, &short_raw)
        } else {
            Vec::new()
        };

        let mut short_entry = entry.raw;
        short_entry[0..11].copy_from_slice(&short_raw);

        let new_count = lfn_entries.len() + 1;
        let old_count = entry.slot_span();
        if new_count <= old_count {
            let start = entry.index + 1 - new_count;
            self.write_slots(entry.location, start, &lfn_entries, &short_entry)?;
            self.mark_slots_deleted(entry.location, entry.first_slot..start)?;
        } else {
            let start = self.find_free_slots(entry.location, new_count)?;
            self.write_slots(entry.location, start, &lfn_entries, &short_entry)?;
            self.delete_entry_slots(entry.location, entry.index)?;
        }
        self.image_mut().flush()?;
        debug!("renamed '{}' to '{}'", entry.name(), new_name);
        Ok(())
    }

    /// Look up an entry by its 8.3 name (case-insensitive).
    pub fn find_entry_by_short_name(
        &mut self,
        location: DirLocation,
        name: &str,
    ) -> Result<Option<DirEntry>, DisketteError> {
        let upper = name.to_uppercase();
        let (stem, ext) = match upper.rfind('.') {
            Some(pos) => (&upper[..pos], &upper[pos + 1..]),
            None => (upper.as_str(), ""),
        };
        if stem.len() > 8 || ext.len() > 3 {
            return Ok(None);
        }
        let raw_name = crate::shortname::pack_short_name(stem, ext);
        Ok(self
            .read_directory(location)?
            .into_iter()
            .find(|e| e.raw_name == raw_name))
    }

    /// The created/modified entry at a known slot index.
    pub(crate) fn entry_at(
        &mut self,
        location: DirLocation,
        index: usize,
    ) -> Result<DirEntry, DisketteError> {
        self.read_directory(location)?
            .into_iter()
            .find(|e| e.index == index)
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("directory slot {} vanished during update", index),
                )
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_short_entry_round_trip() {
        let stamp = NaiveDate::from_ymd_opt(2001, 9, 9)
            .unwrap()
            .and_hms_opt(1, 46, 40)
            .unwrap();
        let raw = build_short_entry(*b"README  TXT", 0x20, 5, 1234, stamp, stamp);
        let entry = DirEntry::from_raw(&raw, 7, 7, None, DirLocation::Root);

        assert_eq!(entry.short_name, "README.TXT");
        assert_eq!(entry.name(), "README.TXT");
        assert_eq!(entry.size, 1234);
        assert_eq!(entry.first_cluster_u16(), 5);
        assert!(entry.attributes.contains(Attributes::ARCHIVE));
        assert!(!entry.is_directory());
        assert_eq!(entry.created, Some(stamp));
        assert_eq!(entry.modified, Some(stamp));
        assert_eq!(entry.accessed, Some(stamp.date()));
        assert_eq!(entry.slot_span(), 1);
    }

    #[test]
    fn test_dot_entries_are_recognized() {
        let now = timestamps::now();
        let raw = build_short_entry(*b".          ", 0x10, 2, 0, now, now);
        let entry = DirEntry::from_raw(&raw, 0, 0, None, DirLocation::Cluster(2));
        assert!(entry.is_dot());
        assert!(entry.is_directory());
    }
}
