// Integration tests for the complete format → write → remount → verify cycle

use phat_core::{FormatOptions, MemoryDisk, MountOptions, PhatError};
use phat_filesystems::*;
use std::collections::HashMap;

/// Files and directories written to every width under test
struct TestData {
    files: HashMap<String, Vec<u8>>,
    directories: Vec<String>,
}

impl TestData {
    fn new() -> Self {
        let mut files = HashMap::new();
        files.insert("/test.txt".to_string(), b"Hello, Phat!".to_vec());
        files.insert("/data.bin".to_string(), vec![0xFF; 1024]);
        files.insert("/unicode_文件.txt".to_string(), "Unicode content 你好".as_bytes().to_vec());
        files.insert("/documents/work/report.txt".to_string(), b"quarterly".repeat(300));
        files.insert("/photos/Holiday Photo 2024.raw".to_string(), (0..9000u32).map(|i| i as u8).collect());

        let directories = vec![
            "/documents".to_string(),
            "/photos".to_string(),
            "/documents/work".to_string(),
        ];
        TestData { files, directories }
    }
}

fn format(sectors: u32, fat_bits: u8) -> Volume<MemoryDisk> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (volume, _) = format_volume(MemoryDisk::new(sectors), &FormatOptions::with_fat_bits(fat_bits)).unwrap();
    volume
}

fn write_read_cycle(sectors: u32, fat_bits: u8) {
    let data = TestData::new();
    let mut volume = format(sectors, fat_bits);
    let free_at_start = volume.free_clusters();

    for dir in &data.directories {
        volume.create_directory(dir).unwrap();
    }
    for (path, contents) in &data.files {
        volume.write_file(path, contents).unwrap();
    }
    assert!(volume.free_clusters() < free_at_start);

    let disk = volume.unmount().unwrap();
    let mut volume = Volume::mount(disk, &MountOptions::default()).unwrap();
    assert!(volume.was_clean());
    for (path, contents) in &data.files {
        assert_eq!(&volume.read_file(path).unwrap(), contents, "{} on FAT{}", path, fat_bits);
    }

    let root: Vec<String> = volume.read_dir("/").unwrap().into_iter().map(|i| i.name).collect();
    for name in ["test.txt", "data.bin", "unicode_文件.txt", "documents", "photos"] {
        assert!(root.iter().any(|n| n == name), "{} missing from {:?}", name, root);
    }

    for path in data.files.keys() {
        volume.delete_file(path).unwrap();
    }
    volume.remove_directory("/documents/work").unwrap();
    volume.remove_directory("/documents").unwrap();
    volume.remove_directory("/photos").unwrap();
    assert_eq!(volume.free_clusters(), free_at_start);
}

#[test]
fn test_fat12_cycle() {
    write_read_cycle(2880, 12);
}

#[test]
fn test_fat16_cycle() {
    write_read_cycle(40_000, 16);
}

#[test]
fn test_fat32_cycle() {
    write_read_cycle(140_000, 32);
}

#[test]
fn test_auto_width() {
    let (volume, _) = format_volume(MemoryDisk::new(2880), &FormatOptions::default()).unwrap();
    assert_eq!(volume.fat_type(), FatType::Fat12);
    let (volume, _) = format_volume(MemoryDisk::new(8 * 0xFF0), &FormatOptions::default()).unwrap();
    assert_eq!(volume.fat_type(), FatType::Fat16);
}

#[test]
fn test_recreated_file_gets_fresh_chain() {
    let mut volume = format(40_000, 16);
    volume.write_file("/keep.bin", &[1u8; 600]).unwrap();
    volume.write_file("/temp.bin", &[2u8; 600]).unwrap();
    let old = volume.read_dir("/").unwrap().into_iter().find(|i| i.name == "temp.bin").unwrap();
    let old_chain = volume.cluster_chain(old.first_cluster()).unwrap();

    volume.delete_file("/temp.bin").unwrap();
    for &cluster in &old_chain {
        assert_eq!(volume.read_fat(cluster).unwrap(), FatEntry::Free);
    }

    volume.write_file("/temp.bin", &[3u8; 600]).unwrap();
    let new = volume.read_dir("/").unwrap().into_iter().find(|i| i.name == "temp.bin").unwrap();
    let new_chain = volume.cluster_chain(new.first_cluster()).unwrap();
    assert_eq!(new_chain.len(), old_chain.len());
    assert_eq!(volume.read_fat(*new_chain.last().unwrap()).unwrap(), FatEntry::EndOfChain);
    assert_eq!(volume.read_file("/temp.bin").unwrap(), vec![3u8; 600]);
    assert_eq!(volume.read_file("/keep.bin").unwrap(), vec![1u8; 600]);
}

#[test]
fn test_remove_directory_then_lookup_fails() {
    let mut volume = format(40_000, 16);
    volume.create_directory("/box").unwrap();
    volume.write_file("/box/item", b"x").unwrap();
    assert!(matches!(volume.remove_directory("/box"), Err(PhatError::DirectoryNotEmpty(_))));

    volume.delete_file("/box/item").unwrap();
    volume.remove_directory("/box").unwrap();
    assert!(volume.open_dir("/box").unwrap_err().is_not_found());
    assert!(volume.read_file("/box/item").unwrap_err().is_not_found());
}

#[test]
fn test_large_directory_grows() {
    let mut volume = format(40_000, 16);
    volume.create_directory("/many").unwrap();
    for i in 0..300 {
        volume.write_file(&format!("/many/entry number {:03}.dat", i), &[i as u8]).unwrap();
    }
    let disk = volume.unmount().unwrap();
    let mut volume = Volume::mount(disk, &MountOptions::read_only()).unwrap();
    let items = volume.read_dir("/many").unwrap();
    assert_eq!(items.len(), 302);
    assert_eq!(items[2].name, "entry number 000.dat");
    assert_eq!(volume.read_file("/many/entry number 299.dat").unwrap(), vec![43u8]);
}

#[test]
fn test_read_only_mount_rejects_changes() {
    let mut volume = format(40_000, 16);
    volume.write_file("/a.txt", b"a").unwrap();
    let disk = volume.unmount().unwrap();
    let before = disk.as_bytes().to_vec();

    let mut volume = Volume::mount(disk, &MountOptions::read_only()).unwrap();
    assert!(matches!(volume.write_file("/b.txt", b"b"), Err(PhatError::ReadOnly(_))));
    assert!(matches!(volume.delete_file("/a.txt"), Err(PhatError::ReadOnly(_))));
    assert!(matches!(volume.rename("/a.txt", "c.txt"), Err(PhatError::ReadOnly(_))));
    assert!(matches!(volume.open_file("/a.txt", OpenMode::ReadWrite), Err(PhatError::ReadOnly(_))));
    assert_eq!(volume.read_file("/a.txt").unwrap(), b"a");
    let disk = volume.unmount().unwrap();
    assert_eq!(disk.as_bytes(), &before[..]);
}

#[test]
fn test_partitioned_disk() {
    let mut disk = MemoryDisk::new(200_000);
    initialize_mbr(&mut disk, false).unwrap();
    let (first, last) = usable_lba_range(&mut disk).unwrap();
    assert_eq!(first, 2048);
    assert_eq!(last, 199_999);
    let p0 = create_partition(&mut disk, 2048, 50_000, true).unwrap();
    let p1 = create_partition(&mut disk, 60_000, 100_000, false).unwrap();
    assert!(matches!(
        create_partition(&mut disk, 40_000, 30_000, false),
        Err(PhatError::PartitionOverlapped)
    ));

    let options = FormatOptions { partition_index: p0, ..FormatOptions::default() };
    let (mut volume, _) = format_volume(disk, &options).unwrap();
    volume.write_file("/first.txt", b"one").unwrap();
    let disk = volume.unmount().unwrap();

    let options = FormatOptions { partition_index: p1, fat_bits: 32, ..FormatOptions::default() };
    let (mut volume, _) = format_volume(disk, &options).unwrap();
    volume.write_file("/second.txt", b"two").unwrap();
    let disk = volume.unmount().unwrap();

    let mount = MountOptions { partition_index: p0, write_enable: false };
    let mut volume = Volume::mount(disk, &mount).unwrap();
    assert_eq!(volume.fat_type(), FatType::Fat16);
    assert_eq!(volume.read_file("/first.txt").unwrap(), b"one");
    assert!(volume.read_file("/second.txt").unwrap_err().is_not_found());
    let disk = volume.unmount().unwrap();

    let mount = MountOptions { partition_index: p1, write_enable: false };
    let mut volume = Volume::mount(disk, &mount).unwrap();
    assert_eq!(volume.fat_type(), FatType::Fat32);
    assert_eq!(volume.read_file("/second.txt").unwrap(), b"two");
    let disk = volume.unmount().unwrap();

    let mount = MountOptions { partition_index: 2, write_enable: false };
    assert!(matches!(Volume::mount(disk.clone(), &mount), Err(PhatError::PartitionTableError(_))));
    let mount = MountOptions { partition_index: 4, write_enable: false };
    assert!(matches!(Volume::mount(disk, &mount), Err(PhatError::PartitionIndexOutOfBound(4))));
}

#[test]
fn test_volume_full() {
    let mut volume = format(2880, 12);
    let capacity = volume.free_clusters() as usize * volume.cluster_size() as usize;
    let result = volume.write_file("/huge.bin", &vec![0xAB; capacity + 512]);
    assert!(matches!(result, Err(PhatError::NotEnoughSpace)));
    assert_eq!(volume.free_clusters(), 0);

    volume.delete_file("/huge.bin").unwrap();
    assert_eq!(volume.free_clusters() as usize * 512, capacity);
}
