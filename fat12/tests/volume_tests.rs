// End-to-end tests driving the full engine against freshly created images.

use std::path::{Path, PathBuf};

use diskette_fat12::fat::{self, FAT12_EOC};
use diskette_fat12::*;
use tempfile::TempDir;

fn new_volume(dir: &TempDir, key: &str) -> (Fat12Volume, PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = dir.path().join(format!("test-{key}.img"));
    create_empty_image(&path, key, None).expect("image creation should succeed");
    let volume = Fat12Volume::open(&path).expect("open should succeed");
    (volume, path)
}

fn find(volume: &mut Fat12Volume, location: DirLocation, name: &str) -> DirEntry {
    volume
        .read_directory(location)
        .unwrap()
        .into_iter()
        .find(|e| e.name().eq_ignore_ascii_case(name))
        .unwrap_or_else(|| panic!("entry '{}' should exist", name))
}

fn patch_byte(path: &Path, offset: u64, patch: impl Fn(u8) -> u8) {
    use std::io::{Read, Seek, SeekFrom, Write};
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] = patch(byte[0]);
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_write_then_extract_round_trips() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");
    let cluster_size = volume.geometry().bytes_per_cluster as usize;
    assert_eq!(cluster_size, 512);

    for (i, size) in [0, 1, cluster_size, cluster_size + 1, cluster_size * 4 + 17]
        .into_iter()
        .enumerate()
    {
        let name = format!("DATA{i}.BIN");
        let data = pattern(size);
        volume
            .write_file(DirLocation::Root, &name, &data, &WriteOptions::default())
            .unwrap();
        let entry = find(&mut volume, DirLocation::Root, &name);
        assert_eq!(entry.size as usize, size);
        assert_eq!(volume.extract_file(&entry).unwrap(), data);
    }

    // Empty files own no clusters
    let empty = find(&mut volume, DirLocation::Root, "DATA0.BIN");
    assert_eq!(empty.first_cluster, 0);
}

#[test]
fn test_long_name_round_trips_over_short_entry() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let entry = volume
        .write_file(
            DirLocation::Root,
            "A Long Mixed Case Name.txt",
            b"payload",
            &WriteOptions::default(),
        )
        .unwrap();
    assert_eq!(entry.long_name.as_deref(), Some("A Long Mixed Case Name.txt"));
    assert_eq!(entry.short_name, "ALONGM~1.TXT");

    let reread = find(&mut volume, DirLocation::Root, "A Long Mixed Case Name.txt");
    assert_eq!(reread.name(), "A Long Mixed Case Name.txt");
    assert_eq!(reread.first_slot, 0);
    assert_eq!(reread.index, 2); // two LFN fragments precede the short entry
}

#[test]
fn test_corrupted_lfn_checksum_falls_back_to_short_name() {
    let dir = TempDir::new().unwrap();
    let (mut volume, path) = new_volume(&dir, "1.44m");

    volume
        .write_file(
            DirLocation::Root,
            "Important Document.txt",
            b"x",
            &WriteOptions::default(),
        )
        .unwrap();

    // Corrupt the stored checksum of the first LFN fragment (slot 0 of an
    // empty root, byte 13).
    let fragment_offset = volume.geometry().root_offset + 13;
    patch_byte(&path, fragment_offset, |b| b.wrapping_add(1));

    let entries = volume.read_directory(DirLocation::Root).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].long_name, None);
    assert_eq!(entries[0].name(), "IMPORT~1.TXT");
}

#[test]
fn test_chain_cycle_is_detected_not_looped() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let entry = volume
        .write_file(
            DirLocation::Root,
            "LOOP.BIN",
            &pattern(1536),
            &WriteOptions::default(),
        )
        .unwrap();

    let total = volume.geometry().total_clusters;
    let mut fat_buffer = volume.read_fat().unwrap();
    let chain = fat::walk_chain(&fat_buffer, entry.first_cluster_u16(), total).unwrap();
    assert_eq!(chain.len(), 3);

    // Point the middle of the chain back at its head
    fat::set_entry(&mut fat_buffer, chain[1], chain[0]);
    volume.write_fat(&fat_buffer).unwrap();

    let err = volume.extract_file(&entry).unwrap_err();
    assert!(matches!(
        err,
        DisketteError::Corruption(CorruptionError::ChainCycle { .. })
    ));
    assert!(fat::walk_chain(&fat_buffer, chain[0], total).is_err());
}

#[test]
fn test_truncated_chain_is_detected() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let entry = volume
        .write_file(
            DirLocation::Root,
            "CUT.BIN",
            &pattern(1536),
            &WriteOptions::default(),
        )
        .unwrap();

    let mut fat_buffer = volume.read_fat().unwrap();
    fat::set_entry(&mut fat_buffer, entry.first_cluster_u16(), FAT12_EOC);
    volume.write_fat(&fat_buffer).unwrap();

    match volume.extract_file(&entry).unwrap_err() {
        DisketteError::Corruption(CorruptionError::TruncatedChain { expected, read }) => {
            assert_eq!(expected, 1536);
            assert_eq!(read, 512);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_delete_reclaims_clusters() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let entry = volume
        .write_file(
            DirLocation::Root,
            "TWOCLUST.BIN",
            &pattern(1024),
            &WriteOptions::default(),
        )
        .unwrap();
    let first = entry.first_cluster_u16();

    let fat_buffer = volume.read_fat().unwrap();
    assert_ne!(fat::get_entry(&fat_buffer, first), 0);
    assert_ne!(fat::get_entry(&fat_buffer, first + 1), 0);

    volume.delete_file(&entry).unwrap();

    let fat_buffer = volume.read_fat().unwrap();
    assert_eq!(fat::get_entry(&fat_buffer, first), 0);
    assert_eq!(fat::get_entry(&fat_buffer, first + 1), 0);
    assert!(volume.read_directory(DirLocation::Root).unwrap().is_empty());
}

#[test]
fn test_subdirectory_grows_into_a_second_cluster() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let sub = volume
        .create_directory(DirLocation::Root, "SUB", &WriteOptions::default())
        .unwrap();
    let sub_location = DirLocation::Cluster(sub.first_cluster_u16());
    let total = volume.geometry().total_clusters;

    // One 512-byte cluster holds 16 slots; `.` and `..` leave 14.
    for i in 0..14 {
        volume
            .write_file(sub_location, &format!("F{i:02}.TXT"), b"x", &WriteOptions::default())
            .unwrap();
    }
    let fat_buffer = volume.read_fat().unwrap();
    assert_eq!(
        fat::walk_chain(&fat_buffer, sub.first_cluster_u16(), total).unwrap().len(),
        1
    );

    let overflow = volume
        .write_file(sub_location, "F14.TXT", b"x", &WriteOptions::default())
        .unwrap();

    let fat_buffer = volume.read_fat().unwrap();
    assert_eq!(
        fat::walk_chain(&fat_buffer, sub.first_cluster_u16(), total).unwrap().len(),
        2
    );
    // The new entry landed on the first slot of the new cluster
    assert_eq!(overflow.index, 16);
}

#[test]
fn test_root_directory_cannot_grow() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "160k");
    assert_eq!(volume.geometry().root_entries, 64);

    for i in 0..64 {
        volume
            .write_file(DirLocation::Root, &format!("R{i:02}.TXT"), b"x", &WriteOptions::default())
            .unwrap();
    }
    let err = volume
        .write_file(DirLocation::Root, "R64.TXT", b"x", &WriteOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        DisketteError::Format(FormatError::DirectoryFull { .. })
    ));
}

#[test]
fn test_rename_preserves_identity() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let original = volume
        .write_file(
            DirLocation::Root,
            "Original Long Name.txt",
            &pattern(700),
            &WriteOptions::default(),
        )
        .unwrap();

    // Longer name: the group relocates to a fresh run
    volume
        .rename(&original, "Renamed To Something Even Longer.txt", true)
        .unwrap();
    let renamed = find(
        &mut volume,
        DirLocation::Root,
        "Renamed To Something Even Longer.txt",
    );
    assert_eq!(renamed.raw[11..32], original.raw[11..32]);
    assert_eq!(renamed.first_cluster, original.first_cluster);
    assert_eq!(renamed.size, original.size);
    assert_eq!(renamed.created, original.created);
    assert_eq!(renamed.modified, original.modified);
    assert_eq!(renamed.accessed, original.accessed);

    // Shorter name: overwritten in place, surplus slots retired
    volume.rename(&renamed, "SHORT.TXT", true).unwrap();
    let shortened = find(&mut volume, DirLocation::Root, "SHORT.TXT");
    assert_eq!(shortened.raw[11..32], original.raw[11..32]);
    assert_eq!(shortened.long_name, None);
    assert_eq!(volume.extract_file(&shortened).unwrap(), pattern(700));
    assert_eq!(volume.read_directory(DirLocation::Root).unwrap().len(), 1);
}

#[test]
fn test_rename_rejects_name_collisions() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let a = volume
        .write_file(DirLocation::Root, "a.txt", b"a", &WriteOptions::default())
        .unwrap();
    volume
        .write_file(DirLocation::Root, "b.txt", b"b", &WriteOptions::default())
        .unwrap();

    let err = volume.rename(&a, "B.TXT", true).unwrap_err();
    assert!(matches!(
        err,
        DisketteError::Format(FormatError::NameCollision { .. })
    ));

    // Renaming to a different casing of itself is not a collision
    volume.rename(&a, "A.txt", true).unwrap();
}

#[test]
fn test_delete_directory_refuses_non_empty_without_recursive() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");
    let free_before = volume.free_space().unwrap();

    let sub = volume
        .create_directory(DirLocation::Root, "TREE", &WriteOptions::default())
        .unwrap();
    let sub_location = DirLocation::Cluster(sub.first_cluster_u16());
    volume
        .write_file(sub_location, "child.txt", &pattern(600), &WriteOptions::default())
        .unwrap();
    let nested = volume
        .create_directory(sub_location, "NESTED", &WriteOptions::default())
        .unwrap();
    volume
        .write_file(
            DirLocation::Cluster(nested.first_cluster_u16()),
            "deep.txt",
            b"deep",
            &WriteOptions::default(),
        )
        .unwrap();

    let err = volume.delete_directory(&sub, false).unwrap_err();
    assert!(matches!(
        err,
        DisketteError::Format(FormatError::DirectoryNotEmpty)
    ));

    volume.delete_directory(&sub, true).unwrap();
    assert!(volume.read_directory(DirLocation::Root).unwrap().is_empty());
    assert_eq!(volume.free_space().unwrap(), free_before);
}

#[test]
fn test_set_attributes_flips_only_requested_bits() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let entry = volume
        .write_file(DirLocation::Root, "FLAGS.TXT", b"x", &WriteOptions::default())
        .unwrap();
    assert!(entry.attributes.contains(Attributes::ARCHIVE));

    volume
        .set_attributes(
            &entry,
            &AttributeEdit {
                read_only: Some(true),
                hidden: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
    let entry = find(&mut volume, DirLocation::Root, "FLAGS.TXT");
    assert!(entry.attributes.contains(Attributes::READ_ONLY));
    assert!(entry.attributes.contains(Attributes::HIDDEN));
    assert!(entry.attributes.contains(Attributes::ARCHIVE)); // untouched

    volume
        .set_attributes(
            &entry,
            &AttributeEdit {
                hidden: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    let entry = find(&mut volume, DirLocation::Root, "FLAGS.TXT");
    assert!(!entry.attributes.contains(Attributes::HIDDEN));
    assert!(entry.attributes.contains(Attributes::READ_ONLY));

    // The Directory bit is structural and survives any edit
    let sub = volume
        .create_directory(DirLocation::Root, "KEEP", &WriteOptions::default())
        .unwrap();
    volume
        .set_attributes(
            &sub,
            &AttributeEdit {
                read_only: Some(true),
                archive: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    let sub = find(&mut volume, DirLocation::Root, "KEEP");
    assert!(sub.is_directory());
    assert!(sub.attributes.contains(Attributes::READ_ONLY));
}

#[test]
fn test_quick_format_clears_the_volume() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "720k");
    let free_fresh = volume.free_space().unwrap();

    volume
        .write_file(DirLocation::Root, "A.TXT", &pattern(3000), &WriteOptions::default())
        .unwrap();
    volume
        .create_directory(DirLocation::Root, "D", &WriteOptions::default())
        .unwrap();

    volume.format(false).unwrap();
    assert!(volume.read_directory(DirLocation::Root).unwrap().is_empty());
    assert_eq!(volume.free_space().unwrap(), free_fresh);
}

#[test]
fn test_full_format_zeroes_the_data_region() {
    let dir = TempDir::new().unwrap();
    let (mut volume, path) = new_volume(&dir, "160k");

    volume
        .write_file(DirLocation::Root, "NOISE.BIN", &pattern(2048), &WriteOptions::default())
        .unwrap();
    volume.format(true).unwrap();

    let data_offset = volume.geometry().data_offset as usize;
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes[data_offset..].iter().all(|&b| b == 0));
}

#[test]
fn test_both_fat_copies_stay_synchronized() {
    let dir = TempDir::new().unwrap();
    let (mut volume, path) = new_volume(&dir, "1.44m");

    volume
        .write_file(DirLocation::Root, "SYNC.BIN", &pattern(4000), &WriteOptions::default())
        .unwrap();

    let fat_offset = volume.geometry().fat_offset as usize;
    let fat_size = volume.geometry().fat_size_bytes as usize;
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(
        bytes[fat_offset..fat_offset + fat_size],
        bytes[fat_offset + fat_size..fat_offset + 2 * fat_size]
    );
}

#[test]
fn test_defragment_preserves_tree_and_compacts_chains() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");
    let options = WriteOptions::default();

    // Punch a hole so the next write fragments
    let a = volume
        .write_file(DirLocation::Root, "A.TXT", &pattern(1500), &options)
        .unwrap();
    volume
        .write_file(DirLocation::Root, "B.TXT", &pattern(900), &options)
        .unwrap();
    volume.delete_file(&a).unwrap();
    let fragged_data = pattern(2000);
    let fragged = volume
        .write_file(DirLocation::Root, "Fragmented File.txt", &fragged_data, &options)
        .unwrap();

    let total = volume.geometry().total_clusters;
    let fat_buffer = volume.read_fat().unwrap();
    let chain = fat::walk_chain(&fat_buffer, fragged.first_cluster_u16(), total).unwrap();
    assert!(
        chain.windows(2).any(|w| w[1] != w[0] + 1),
        "expected a fragmented chain, got {chain:?}"
    );

    let sub = volume
        .create_directory(DirLocation::Root, "SUB", &options)
        .unwrap();
    volume
        .write_file(
            DirLocation::Cluster(sub.first_cluster_u16()),
            "inner.dat",
            &pattern(1300),
            &options,
        )
        .unwrap();

    let b_before = find(&mut volume, DirLocation::Root, "B.TXT");
    volume
        .set_attributes(
            &b_before,
            &AttributeEdit {
                hidden: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
    let b_before = find(&mut volume, DirLocation::Root, "B.TXT");
    let frag_before = find(&mut volume, DirLocation::Root, "Fragmented File.txt");
    let free_before = volume.free_space().unwrap();

    volume.defragment().unwrap();

    // Contents and metadata survived
    let b = find(&mut volume, DirLocation::Root, "B.TXT");
    assert_eq!(volume.extract_file(&b).unwrap(), pattern(900));
    assert_eq!(b.created, b_before.created);
    assert_eq!(b.modified, b_before.modified);
    assert_eq!(b.attributes, b_before.attributes);

    let frag = find(&mut volume, DirLocation::Root, "Fragmented File.txt");
    assert_eq!(volume.extract_file(&frag).unwrap(), fragged_data);
    assert_eq!(frag.created, frag_before.created);
    assert_eq!(frag.modified, frag_before.modified);

    let sub = find(&mut volume, DirLocation::Root, "SUB");
    let inner = find(
        &mut volume,
        DirLocation::Cluster(sub.first_cluster_u16()),
        "inner.dat",
    );
    assert_eq!(volume.extract_file(&inner).unwrap(), pattern(1300));

    // Every chain is contiguous now and no space leaked
    let fat_buffer = volume.read_fat().unwrap();
    for entry in [&frag, &inner] {
        let chain = fat::walk_chain(&fat_buffer, entry.first_cluster_u16(), total).unwrap();
        assert!(
            chain.windows(2).all(|w| w[1] == w[0] + 1),
            "chain for '{}' still fragmented: {chain:?}",
            entry.name()
        );
    }
    assert_eq!(volume.free_space().unwrap(), free_before);
}

#[test]
fn test_predict_short_name_tracks_collisions() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let predicted = volume
        .predict_short_name(DirLocation::Root, "ThisIsALongFileName.txt", true)
        .unwrap();
    assert_eq!(predicted, "THISIS~1.TXT");

    volume
        .write_file(
            DirLocation::Root,
            "ThisIsALongFileName.txt",
            b"x",
            &WriteOptions::default(),
        )
        .unwrap();
    let predicted = volume
        .predict_short_name(DirLocation::Root, "ThisIsALongFileNameToo.txt", true)
        .unwrap();
    assert_eq!(predicted, "THISIS~2.TXT");
}

#[test]
fn test_find_entry_by_short_name() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    volume
        .write_file(
            DirLocation::Root,
            "Quarterly Report.doc",
            b"q",
            &WriteOptions::default(),
        )
        .unwrap();

    let hit = volume
        .find_entry_by_short_name(DirLocation::Root, "quarte~1.doc")
        .unwrap()
        .expect("short-name lookup should hit");
    assert_eq!(hit.long_name.as_deref(), Some("Quarterly Report.doc"));

    assert!(volume
        .find_entry_by_short_name(DirLocation::Root, "MISSING.TXT")
        .unwrap()
        .is_none());
}

#[test]
fn test_owner_of_cluster_reports_the_owning_entry() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let sub = volume
        .create_directory(DirLocation::Root, "SUB", &WriteOptions::default())
        .unwrap();
    let entry = volume
        .write_file(
            DirLocation::Cluster(sub.first_cluster_u16()),
            "OWNED.BIN",
            &pattern(1100),
            &WriteOptions::default(),
        )
        .unwrap();

    // Ask about the middle of the file's chain, not its head
    let second_cluster = entry.first_cluster_u16() + 1;
    let owner = volume
        .owner_of_cluster(second_cluster)
        .unwrap()
        .expect("cluster should have an owner");
    assert_eq!(owner.name(), "OWNED.BIN");
}

#[test]
fn test_disk_full_rolls_back_the_slot_reservation() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "160k");

    let capacity = volume.free_space().unwrap() as usize;
    let err = volume
        .write_file(
            DirLocation::Root,
            "TOOBIG.BIN",
            &pattern(capacity + 512),
            &WriteOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DisketteError::Format(FormatError::DiskFull { .. })
    ));

    // No stranded entry and no leaked clusters
    assert!(volume.read_directory(DirLocation::Root).unwrap().is_empty());
    assert_eq!(volume.free_space().unwrap() as usize, capacity);
}

#[test]
fn test_explicit_modify_time_is_recorded() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");

    let stamp = chrono::NaiveDate::from_ymd_opt(1997, 8, 29)
        .unwrap()
        .and_hms_opt(2, 14, 0)
        .unwrap();
    let entry = volume
        .write_file(
            DirLocation::Root,
            "STAMPED.TXT",
            b"x",
            &WriteOptions {
                modified: Some(stamp),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(entry.modified, Some(stamp));
}

#[test]
fn test_open_rejects_undersized_images() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tiny.img");
    std::fs::write(&path, [0u8; 100]).unwrap();
    let err = Fat12Volume::open(&path).unwrap_err();
    assert!(matches!(
        err,
        DisketteError::Format(FormatError::BootSectorTooSmall { len: 100 })
    ));
}

#[test]
fn test_fresh_image_reports_full_free_space() {
    let dir = TempDir::new().unwrap();
    let (mut volume, _) = new_volume(&dir, "1.44m");
    assert_eq!(volume.volume_label(), None);
    assert_eq!(volume.free_space().unwrap(), 2847 * 512);
    assert_eq!(volume.used_space().unwrap(), 0);
}
