// Volume handle: the collaborator-facing entry point
// Owns the image file and the geometry parsed from its boot sector; every
// engine operation hangs off this type.

use std::collections::HashSet;
use std::path::Path;

use diskette_core::{DisketteError, FormatError, ImageFile};
use log::info;

use crate::dir::{DirEntry, DirLocation};
use crate::fat;
use crate::geometry::{VolumeGeometry, SECTOR_SIZE};
use crate::shortname::{generate_short_name, parse_short_name};

#[derive(Debug)]
pub struct Fat12Volume {
    image: ImageFile,
    geometry: VolumeGeometry,
}

impl Fat12Volume {
    /// Open an existing image and parse its boot sector.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DisketteError> {
        let mut image = ImageFile::open(path)?;
        let len = image.len()?;
        if len < SECTOR_SIZE as u64 {
            return Err(FormatError::BootSectorTooSmall { len: len as usize }.into());
        }
        let boot = image.read_at(0, SECTOR_SIZE)?;
        let geometry = VolumeGeometry::parse(&boot)?;

        info!("opened {} ({} bytes)", image.path().display(), len);
        info!(
            "  {}/sector, {}/cluster, {} root entries, {} data clusters, {}",
            geometry.bytes_per_sector,
            geometry.bytes_per_cluster,
            geometry.root_entries,
            geometry.total_clusters,
            geometry.fat_type.name(),
        );
        Ok(Self { image, geometry })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub(crate) fn image_mut(&mut self) -> &mut ImageFile {
        &mut self.image
    }

    /// EBPB volume label, `None` when unset.
    pub fn volume_label(&self) -> Option<String> {
        self.geometry.label()
    }

    /// The 8.3 name `write_file` would assign to `name` in this directory.
    pub fn predict_short_name(
        &mut self,
        location: DirLocation,
        name: &str,
        use_numeric_tail: bool,
    ) -> Result<String, DisketteError> {
        let existing: Vec<[u8; 11]> = self
            .read_directory(location)?
            .iter()
            .map(|e| e.raw_name)
            .collect();
        let raw = generate_short_name(name, &existing, use_numeric_tail);
        Ok(parse_short_name(&raw))
    }

    /// Report which entry owns `cluster`: scan the FAT backward to the head
    /// of its chain, then search the directory tree for the entry whose
    /// first cluster is that head.
    pub fn owner_of_cluster(&mut self, cluster: u16) -> Result<Option<DirEntry>, DisketteError> {
        let total_clusters = self.geometry().total_clusters;
        let fat_buffer = self.read_fat()?;
        let head = fat::find_chain_start(&fat_buffer, cluster, total_clusters)?;

        let mut pending = vec![DirLocation::Root];
        let mut seen: HashSet<u16> = HashSet::new();
        while let Some(location) = pending.pop() {
            for entry in self.read_directory(location)? {
                if entry.is_dot() {
                    continue;
                }
                if entry.first_cluster_u16() == head {
                    return Ok(Some(entry));
                }
                if entry.is_directory() && seen.insert(entry.first_cluster_u16()) {
                    pending.push(DirLocation::Cluster(entry.first_cluster_u16()));
                }
            }
        }
        Ok(None)
    }
}
