// Whole-volume defragmentation: lift every entry off the disk, quick-format,
// and replay the tree so each chain comes back contiguous.

use std::collections::{HashMap, HashSet, VecDeque};

use diskette_core::{CorruptionError, DisketteError};
use log::info;

use crate::dir::{DirEntry, DirLocation};
use crate::file_ops::WriteOptions;
use crate::volume::Fat12Volume;

struct CollectedEntry {
    /// Path components from the root; the last one is the entry's own name.
    path: Vec<String>,
    is_directory: bool,
    data: Vec<u8>,
    /// Original short-entry bytes, for restoring attributes and timestamps.
    raw: [u8; 32],
}

impl Fat12Volume {
    /// Rewrite the volume with every chain laid out contiguously.
    ///
    /// Collection walks the tree iteratively and hard-fails on any
    /// corruption — a half-readable volume must not be formatted. The
    /// replay stamps fresh timestamps, so each recreated entry gets its
    /// attribute byte and all four timestamp fields patched back from the
    /// original afterwards.
    pub fn defragment(&mut self) -> Result<(), DisketteError> {
        let mut collected: Vec<CollectedEntry> = Vec::new();
        let mut pending: VecDeque<(DirLocation, Vec<String>)> = VecDeque::new();
        pending.push_back((DirLocation::Root, Vec::new()));
        let mut seen: HashSet<u16> = HashSet::new();

        while let Some((location, path)) = pending.pop_front() {
            for entry in self.read_directory(location)? {
                if entry.is_dot() {
                    continue;
                }
                let mut entry_path = path.clone();
                entry_path.push(entry.name().to_string());

                if entry.is_directory() {
                    let cluster = entry.first_cluster_u16();
                    if !seen.insert(cluster) {
                        return Err(CorruptionError::ChainCycle { cluster }.into());
                    }
                    pending.push_back((DirLocation::Cluster(cluster), entry_path.clone()));
                    collected.push(CollectedEntry {
                        path: entry_path,
                        is_directory: true,
                        data: Vec::new(),
                        raw: entry.raw,
                    });
                } else {
                    let data = self.extract_file(&entry)?;
                    collected.push(CollectedEntry {
                        path: entry_path,
                        is_directory: false,
                        data,
                        raw: entry.raw,
                    });
                }
            }
        }

        info!("defragmenting: {} entries to replay", collected.len());
        self.format(false)?;

        // Parents before children, stable order within a directory.
        collected.sort_by(|a, b| {
            (a.path.len(), a.path.last()).cmp(&(b.path.len(), b.path.last()))
        });

        let mut directory_map: HashMap<Vec<String>, u16> = HashMap::new();
        let options = WriteOptions::default();
        for item in &collected {
            let parent_path = &item.path[..item.path.len() - 1];
            let parent = if parent_path.is_empty() {
                DirLocation::Root
            } else {
                DirLocation::Cluster(directory_map[parent_path])
            };
            let name = item.path.last().map(String::as_str).unwrap_or_default();

            let created = if item.is_directory {
                let created = self.create_directory(parent, name, &options)?;
                directory_map.insert(item.path.clone(), created.first_cluster_u16());
                created
            } else {
                self.write_file(parent, name, &item.data, &options)?
            };
            self.restore_entry_metadata(&created, &item.raw)?;
        }
        self.image_mut().flush()?;
        info!("defragmentation complete");
        Ok(())
    }

    /// Copy the attribute byte and the creation/access/modify stamps from
    /// the original short entry onto a freshly written one.
    fn restore_entry_metadata(
        &mut self,
        entry: &DirEntry,
        original: &[u8; 32],
    ) -> Result<(), DisketteError> {
        let offsets = self.dir_slot_offsets(entry.location)?;
        let offset = offsets[entry.index];
        let mut slot = self.image_mut().read_at(offset, 32)?;
        slot[11] = original[11];
        // [13] creation tenths, [14:18] creation time/date, [18:20] access
        slot[13..20].copy_from_slice(&original[13..20]);
        // [22:26] modify time/date
        slot[22..26].copy_from_slice(&original[22..26]);
        self.image_mut().write_at(offset, &slot)?;
        Ok(())
    }
}
