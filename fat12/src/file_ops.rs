// File and directory mutations, composing the FAT codec with the directory
// engine. Directory slots are always reserved before data clusters so a
// failed allocation never strands an entry without backing data.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use diskette_core::{CorruptionError, DisketteError, FormatError};
use log::debug;

use crate::dir::{build_short_entry, Attributes, DirEntry, DirLocation};
use crate::fat::{self, FatEntryClass, FAT12_EOC};
use crate::long_names::build_lfn_entries;
use crate::shortname::{generate_short_name, needs_lfn};
use crate::timestamps;
use crate::volume::Fat12Volume;

/// Options for `write_file` and `create_directory`.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Append `~N` to the generated 8.3 name to avoid collisions.
    pub use_numeric_tail: bool,
    /// Modification stamp to record; `None` stamps the current time.
    pub modified: Option<NaiveDateTime>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            use_numeric_tail: true,
            modified: None,
        }
    }
}

/// Attribute bits to flip; `None` leaves a bit untouched. The Directory and
/// VolumeLabel bits are structural and can never be edited.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeEdit {
    pub read_only: Option<bool>,
    pub hidden: Option<bool>,
    pub system: Option<bool>,
    pub archive: Option<bool>,
}

fn apply_bit(attribute_byte: &mut u8, flag: Attributes, value: Option<bool>) {
    match value {
        Some(true) => *attribute_byte |= flag.bits(),
        Some(false) => *attribute_byte &= !flag.bits(),
        None => {}
    }
}

impl Fat12Volume {
    /// Write a whole file into `location`, returning its new entry.
    pub fn write_file(
        &mut self,
        location: DirLocation,
        name: &str,
        data: &[u8],
        options: &WriteOptions,
    ) -> Result<DirEntry, DisketteError> {
        let existing: Vec<[u8; 11]> = self
            .read_directory(location)?
            .iter()
            .map(|e| e.raw_name)
            .collect();
        let short_raw = generate_short_name(name, &existing, options.use_numeric_tail);
        let lfn_entries = if needs_lfn(name) {
            build_lfn_entries(name, &short_raw)
        } else {
            Vec::new()
        };
        let slot_count = lfn_entries.len() + 1;

        // Reserve directory space first; if cluster allocation falls short
        // below, this reservation is the one step that gets undone.
        let slot_start = self.find_free_slots(location, slot_count)?;

        let bytes_per_cluster = self.geometry().bytes_per_cluster as usize;
        let total_clusters = self.geometry().total_clusters;
        let clusters_needed = (data.len() + bytes_per_cluster - 1) / bytes_per_cluster;
        let mut fat_buffer = self.read_fat()?;
        let clusters = fat::find_free(&fat_buffer, total_clusters, Some(clusters_needed));
        if clusters.len() < clusters_needed {
            self.mark_slots_deleted(location, slot_start..slot_start + slot_count)?;
            self.image_mut().flush()?;
            return Err(FormatError::DiskFull {
                needed: clusters_needed,
                found: clusters.len(),
            }
            .into());
        }

        let now = timestamps::now();
        let modified = options.modified.unwrap_or(now);
        // Empty files carry no clusters and a zero first-cluster field
        let first_cluster = clusters.first().copied().unwrap_or(0);
        let short_entry = build_short_entry(
            short_raw,
            Attributes::ARCHIVE.bits(),
            first_cluster,
            data.len() as u32,
            now,
            modified,
        );
        self.write_slots(location, slot_start, &lfn_entries, &short_entry)?;

        for (i, &cluster) in clusters.iter().enumerate() {
            let begin = i * bytes_per_cluster;
            let end = (begin + bytes_per_cluster).min(data.len());
            self.write_cluster(cluster, &data[begin..end])?;
            let next = clusters.get(i + 1).copied().unwrap_or(FAT12_EOC);
            fat::set_entry(&mut fat_buffer, cluster, next);
        }
        if !clusters.is_empty() {
            self.write_fat(&fat_buffer)?;
        }
        self.image_mut().flush()?;
        debug!(
            "wrote '{}': {} bytes over {} cluster(s)",
            name,
            data.len(),
            clusters.len()
        );
        self.entry_at(location, slot_start + lfn_entries.len())
    }

    /// Read a file's bytes by walking its cluster chain up to the declared
    /// size. A repeated cluster or a chain that ends early is corruption.
    pub fn extract_file(&mut self, entry: &DirEntry) -> Result<Vec<u8>, DisketteError> {
        let size = entry.size as usize;
        let first = entry.first_cluster_u16();
        if first < 2 {
            return Ok(Vec::new());
        }

        let bytes_per_cluster = self.geometry().bytes_per_cluster as usize;
        let fat_buffer = self.read_fat()?;
        let mut data = Vec::with_capacity(size);
        let mut visited = HashSet::new();
        let mut current = first;

        while data.len() < size {
            if !self.geometry().is_valid_cluster(current) {
                return Err(CorruptionError::TruncatedChain {
                    expected: size as u32,
                    read: data.len() as u32,
                }
                .into());
            }
            if !visited.insert(current) {
                return Err(CorruptionError::ChainCycle { cluster: current }.into());
            }
            let take = bytes_per_cluster.min(size - data.len());
            let offset = self.geometry().cluster_offset(current);
            data.extend_from_slice(&self.image_mut().read_at(offset, take)?);
            if data.len() >= size {
                break;
            }
            let next = fat::get_entry(&fat_buffer, current);
            match fat::classify(next) {
                FatEntryClass::Used => current = next,
                _ => {
                    return Err(CorruptionError::TruncatedChain {
                        expected: size as u32,
                        read: data.len() as u32,
                    }
                    .into())
                }
            }
        }
        Ok(data)
    }

    /// Create a subdirectory in `location`, returning its new entry.
    pub fn create_directory(
        &mut self,
        location: DirLocation,
        name: &str,
        options: &WriteOptions,
    ) -> Result<DirEntry, DisketteError> {
        let existing: Vec<[u8; 11]> = self
            .read_directory(location)?
            .iter()
            .map(|e| e.raw_name)
            .collect();
        let short_raw = generate_short_name(name, &existing, options.use_numeric_tail);
        let lfn_entries = if needs_lfn(name) {
            build_lfn_entries(name, &short_raw)
        } else {
            Vec::new()
        };
        let slot_count = lfn_entries.len() + 1;

        let slot_start = self.find_free_slots(location, slot_count)?;

        let total_clusters = self.geometry().total_clusters;
        let mut fat_buffer = self.read_fat()?;
        let free = fat::find_free(&fat_buffer, total_clusters, Some(1));
        let cluster = match free.first() {
            Some(&cluster) => cluster,
            None => {
                self.mark_slots_deleted(location, slot_start..slot_start + slot_count)?;
                self.image_mut().flush()?;
                return Err(FormatError::DiskFull {
                    needed: 1,
                    found: 0,
                }
                .into());
            }
        };
        fat::set_entry(&mut fat_buffer, cluster, FAT12_EOC);
        self.write_fat(&fat_buffer)?;
        self.initialize_subdirectory(cluster, location)?;

        let now = timestamps::now();
        let modified = options.modified.unwrap_or(now);
        let short_entry = build_short_entry(
            short_raw,
            Attributes::DIRECTORY.bits(),
            cluster,
            0,
            now,
            modified,
        );
        self.write_slots(location, slot_start, &lfn_entries, &short_entry)?;
        self.image_mut().flush()?;
        debug!("created directory '{}' at cluster {}", name, cluster);
        self.entry_at(location, slot_start + lfn_entries.len())
    }

    /// Delete a file: retire its entry group, then release its chain.
    pub fn delete_file(&mut self, entry: &DirEntry) -> Result<(), DisketteError> {
        let first = entry.first_cluster_u16();
        let total_clusters = self.geometry().total_clusters;

        if first >= 2 {
            let mut fat_buffer = self.read_fat()?;
            // Validates the chain up front; a cyclic chain aborts the
            // delete before anything is touched.
            let chain = fat::free_chain(&mut fat_buffer, first, total_clusters)?;
            self.delete_entry_slots(entry.location, entry.index)?;
            self.write_fat(&fat_buffer)?;
            debug!("deleted '{}', freed {} cluster(s)", entry.name(), chain.len());
        } else {
            self.delete_entry_slots(entry.location, entry.index)?;
            debug!("deleted empty file '{}'", entry.name());
        }
        self.image_mut().flush()?;
        Ok(())
    }

    /// Delete a directory. Without `recursive` the directory must contain
    /// nothing but `.` and `..`; with it, children are removed depth-first
    /// with an explicit stack.
    pub fn delete_directory(
        &mut self,
        entry: &DirEntry,
        recursive: bool,
    ) -> Result<(), DisketteError> {
        let own_cluster = entry.first_cluster_u16();
        let children: Vec<DirEntry> = self
            .read_directory(DirLocation::Cluster(own_cluster))?
            .into_iter()
            .filter(|e| !e.is_dot())
            .collect();

        if !children.is_empty() && !recursive {
            return Err(FormatError::DirectoryNotEmpty.into());
        }

        if recursive {
            let mut files = Vec::new();
            let mut directories = Vec::new();
            let mut seen = HashSet::from([own_cluster]);
            let mut pending = children;
            while let Some(child) = pending.pop() {
                if child.is_directory() {
                    let cluster = child.first_cluster_u16();
                    if !seen.insert(cluster) {
                        return Err(CorruptionError::ChainCycle { cluster }.into());
                    }
                    for grandchild in self.read_directory(DirLocation::Cluster(cluster))? {
                        if !grandchild.is_dot() {
                            pending.push(grandchild);
                        }
                    }
                    directories.push(child);
                } else {
                    files.push(child);
                }
            }
            for file in &files {
                self.delete_file(file)?;
            }
            // Discovery order puts parents first; delete in reverse so every
            // directory is empty by the time its own turn comes.
            for directory in directories.iter().rev() {
                self.remove_directory_entry(directory)?;
            }
        }
        self.remove_directory_entry(entry)
    }

    fn remove_directory_entry(&mut self, entry: &DirEntry) -> Result<(), DisketteError> {
        let first = entry.first_cluster_u16();
        let total_clusters = self.geometry().total_clusters;
        let mut fat_buffer = self.read_fat()?;
        let chain = fat::free_chain(&mut fat_buffer, first, total_clusters)?;
        self.delete_entry_slots(entry.location, entry.index)?;
        self.write_fat(&fat_buffer)?;
        self.image_mut().flush()?;
        debug!(
            "removed directory '{}', freed {} cluster(s)",
            entry.name(),
            chain.len()
        );
        Ok(())
    }

    /// Flip the requested attribute bits on an entry. The byte is re-read
    /// from disk so a stale `DirEntry` cannot clobber newer flags, and the
    /// Directory/VolumeLabel bits stay as they are.
    pub fn set_attributes(
        &mut self,
        entry: &DirEntry,
        edit: &AttributeEdit,
    ) -> Result<(), DisketteError> {
        let offsets = self.dir_slot_offsets(entry.location)?;
        let offset = offsets[entry.index];
        let slot = self.image_mut().read_at(offset, 32)?;

        let mut attribute_byte = slot[11];
        apply_bit(&mut attribute_byte, Attributes::READ_ONLY, edit.read_only);
        apply_bit(&mut attribute_byte, Attributes::HIDDEN, edit.hidden);
        apply_bit(&mut attribute_byte, Attributes::SYSTEM, edit.system);
        apply_bit(&mut attribute_byte, Attributes::ARCHIVE, edit.archive);

        self.image_mut().write_at(offset + 11, &[attribute_byte])?;
        self.image_mut().flush()?;
        Ok(())
    }

    /// Write one cluster's worth of data, zero-padding the remainder.
    pub(crate) fn write_cluster(
        &mut self,
        cluster: u16,
        data: &[u8],
    ) -> Result<(), DisketteError> {
        let bytes_per_cluster = self.geometry().bytes_per_cluster as usize;
        let offset = self.geometry().cluster_offset(cluster);
        self.image_mut().write_at(offset, data)?;
        if data.len() < bytes_per_cluster {
            self.image_mut().zero_range(
                offset + data.len() as u64,
                (bytes_per_cluster - data.len()) as u64,
            )?;
        }
        Ok(())
    }
}
