// Directory operations
// Entry creation with LFN runs and numeric-tail aliases, deletion, and the
// path-level directory API built on top of them.

use log::{debug, info};
use phat_core::{BlockDevice, PhatError, PhatResult, SECTOR_SIZE};
use std::collections::HashSet;

use crate::dir_cursor::{DirCursor, DirItem};
use crate::fat_common::attributes::*;
use crate::fat_common::constants::*;
use crate::fat_common::long_names::{
    create_lfn_entries, fit_83, is_valid_filename, lfn_entry_count, short_name_base, with_numeric_tail,
    ShortName, MAX_NUMERIC_TAIL,
};
use crate::fat_common::{DirRecord, ShortEntry};
use crate::path_resolver::{components, normalize_path, Lookup};
use crate::volume::Volume;

const DOT_NAME: [u8; 11] = *b".          ";
const DOTDOT_NAME: [u8; 11] = *b"..         ";

fn already_exists(item: &DirItem) -> PhatError {
    if item.is_directory() {
        PhatError::DirectoryAlreadyExists(item.name.clone())
    } else {
        PhatError::FileAlreadyExists(item.name.clone())
    }
}

impl<D: BlockDevice> Volume<D> {
    /// First alias `STEM~N.EXT` not taken in the directory.
    fn generate_alias(&self, name: &str, taken: &HashSet<[u8; 11]>) -> PhatResult<[u8; 11]> {
        let stem = short_name_base(name);
        (1..=MAX_NUMERIC_TAIL)
            .map(|n| with_numeric_tail(&stem, n))
            .find(|alias| !taken.contains(alias))
            .ok_or_else(|| PhatError::FsError(format!("no short name left for {}", name)))
    }

    /// First slot of a run of `count` free slots. The run may extend past
    /// the end marker or past the last cluster; growth supplies the rest.
    fn find_free_run(&mut self, dir_start: u32, count: u32) -> PhatResult<u32> {
        let mut cursor = DirCursor::new(dir_start);
        let mut run_start = 0;
        let mut run_len = 0;
        let mut slot = 0;
        loop {
            match self.read_slot(&mut cursor, slot)? {
                None | Some(DirRecord::End) => {
                    return Ok(if run_len == 0 { slot } else { run_start });
                }
                Some(record) if record.is_free() => {
                    if run_len == 0 {
                        run_start = slot;
                    }
                    run_len += 1;
                    if run_len == count {
                        return Ok(run_start);
                    }
                }
                Some(_) => run_len = 0,
            }
            slot += 1;
        }
    }

    /// Add `name` to the directory at `dir_start`. The name and case bits of
    /// `entry` are replaced; everything else is written as given.
    pub(crate) fn create_entry(&mut self, dir_start: u32, name: &str, mut entry: ShortEntry) -> PhatResult<DirItem> {
        is_valid_filename(name)?;

        let mut taken = HashSet::new();
        let mut cursor = DirCursor::new(dir_start);
        while let Some(item) = self.next_entry(&mut cursor)? {
            if item.name == name {
                return Err(already_exists(&item));
            }
            taken.insert(item.entry.name);
        }

        let (short, lfn_count) = match fit_83(name) {
            Some(short) if !taken.contains(&short.name) => (short, 0),
            _ => {
                let alias = self.generate_alias(name, &taken)?;
                (ShortName { name: alias, case_info: 0 }, lfn_entry_count(name) as u32)
            }
        };
        entry.name = short.name;
        entry.case_info = short.case_info;

        let total = lfn_count + 1;
        let first_slot = self.find_free_run(dir_start, total)?;
        let short_slot = first_slot + lfn_count;
        let mut cursor = DirCursor::new(dir_start);
        // Claim the whole run up front so a full directory fails before any
        // record is written.
        self.slot_location(&mut cursor, short_slot, true)?;

        if lfn_count > 0 {
            let records = create_lfn_entries(name, entry.checksum());
            for (i, record) in records.iter().enumerate() {
                self.write_slot(&mut cursor, first_slot + i as u32, &record.to_bytes())?;
            }
        }
        self.write_slot(&mut cursor, short_slot, &entry.to_bytes())?;
        debug!(
            "Entry {:?} as {} in slots {}..={} of directory {}",
            name,
            String::from_utf8_lossy(&entry.name),
            first_slot,
            short_slot,
            dir_start
        );

        Ok(DirItem {
            name: name.to_string(),
            entry,
            first_slot,
            short_slot,
        })
    }

    /// Mark every slot of `item` deleted, leaving its clusters alone.
    pub(crate) fn remove_slots(&mut self, dir_start: u32, item: &DirItem) -> PhatResult<()> {
        let mut cursor = DirCursor::new(dir_start);
        for slot in item.first_slot..=item.short_slot {
            self.mark_slot_deleted(&mut cursor, slot)?;
        }
        Ok(())
    }

    /// Remove `item` from its directory and free its cluster chain.
    pub(crate) fn delete_entry(&mut self, dir_start: u32, item: &DirItem) -> PhatResult<()> {
        self.remove_slots(dir_start, item)?;
        if item.first_cluster() != 0 {
            self.free_chain(item.first_cluster())?;
        }
        Ok(())
    }

    /// Value a ".." entry stores for `parent`.
    fn dotdot_cluster(&self, parent: u32) -> u32 {
        if parent == self.root_start() {
            0
        } else {
            parent
        }
    }

    /// Wipe a new directory cluster and write its "." and ".." entries.
    fn init_directory_cluster(&mut self, cluster: u32, parent: u32) -> PhatResult<()> {
        self.wipe_cluster(cluster)?;
        let now = self.now();
        let mut dot = ShortEntry::new(DOT_NAME, ATTR_DIRECTORY, 0, now);
        dot.first_cluster = cluster;
        let mut dotdot = ShortEntry::new(DOTDOT_NAME, ATTR_DIRECTORY, 0, now);
        dotdot.first_cluster = self.dotdot_cluster(parent);

        let mut sector = [0u8; SECTOR_SIZE];
        dot.encode(&mut sector[..DIR_ENTRY_SIZE]);
        dotdot.encode(&mut sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE]);
        let lba = self.geometry.cluster_to_lba(cluster);
        self.cache.overwrite(&mut self.device, lba, &sector)
    }

    /// Create one directory under `parent`; returns its first cluster.
    fn make_directory(&mut self, parent: u32, name: &str) -> PhatResult<u32> {
        is_valid_filename(name)?;
        let cluster = self.allocate_cluster(None)?;
        let entry = {
            let mut entry = ShortEntry::new([b' '; 11], ATTR_DIRECTORY, 0, self.now());
            entry.first_cluster = cluster;
            entry
        };
        let created = self
            .init_directory_cluster(cluster, parent)
            .and_then(|_| self.create_entry(parent, name, entry));
        match created {
            Ok(_) => {
                info!("Created directory {:?} at cluster {}", name, cluster);
                Ok(cluster)
            }
            Err(e) => {
                self.release_cluster(cluster);
                Err(e)
            }
        }
    }

    /// Cursor at the start of the directory `path`.
    pub fn open_dir(&mut self, path: &str) -> PhatResult<DirCursor> {
        let start = self.resolve_dir(path)?;
        Ok(DirCursor::new(start))
    }

    /// Every item of the directory `path`, including "." and "..".
    pub fn read_dir(&mut self, path: &str) -> PhatResult<Vec<DirItem>> {
        let mut cursor = self.open_dir(path)?;
        let mut items = Vec::new();
        while let Some(item) = self.next_entry(&mut cursor)? {
            items.push(item);
        }
        Ok(items)
    }

    /// Create `path` and any missing directories above it.
    pub fn create_directory(&mut self, path: &str) -> PhatResult<()> {
        self.begin_write()?;
        let parts = components(path);
        if parts.is_empty() {
            return Err(PhatError::DirectoryAlreadyExists("/".to_string()));
        }
        let mut dir = self.root_start();
        for (i, name) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            dir = match self.find_entry(dir, name)? {
                Some(item) if last => return Err(already_exists(&item)),
                Some(item) if item.is_directory() => self.dir_start_for(item.first_cluster()),
                Some(_) => {
                    return Err(PhatError::NotADirectory(format!("/{}", parts[..=i].join("/"))));
                }
                None => self.make_directory(dir, name)?,
            };
        }
        Ok(())
    }

    /// Remove an empty directory.
    pub fn remove_directory(&mut self, path: &str) -> PhatResult<()> {
        self.begin_write()?;
        let (parent, item) = match self.lookup(path)? {
            Lookup::Root => {
                return Err(PhatError::InvalidPath("cannot remove the root directory".to_string()));
            }
            Lookup::Missing { .. } => return Err(PhatError::DirectoryNotFound(normalize_path(path))),
            Lookup::Found { parent, item } => (parent, item),
        };
        if !item.is_directory() {
            return Err(PhatError::NotADirectory(normalize_path(path)));
        }

        let mut cursor = DirCursor::new(self.dir_start_for(item.first_cluster()));
        while let Some(child) = self.next_entry(&mut cursor)? {
            if !child.is_dot_entry() {
                return Err(PhatError::DirectoryNotEmpty(normalize_path(path)));
            }
        }
        self.delete_entry(parent, &item)?;
        info!("Removed directory {}", normalize_path(path));
        Ok(())
    }

    pub fn delete_file(&mut self, path: &str) -> PhatResult<()> {
        self.begin_write()?;
        match self.lookup(path)? {
            Lookup::Root => Err(PhatError::IsADirectory("/".to_string())),
            Lookup::Missing { .. } => Err(PhatError::FileNotFound(normalize_path(path))),
            Lookup::Found { item, .. } if item.is_directory() => Err(PhatError::IsADirectory(normalize_path(path))),
            Lookup::Found { parent, item } => {
                self.delete_entry(parent, &item)?;
                info!("Deleted {}", normalize_path(path));
                Ok(())
            }
        }
    }

    fn lookup_existing(&mut self, path: &str) -> PhatResult<(u32, DirItem)> {
        match self.lookup(path)? {
            Lookup::Root => Err(PhatError::InvalidPath("the root directory has no entry".to_string())),
            Lookup::Missing { .. } => Err(PhatError::FileNotFound(normalize_path(path))),
            Lookup::Found { parent, item } => Ok((parent, item)),
        }
    }

    /// Give the entry at `path` a new name in the same directory.
    pub fn rename(&mut self, path: &str, new_name: &str) -> PhatResult<()> {
        self.begin_write()?;
        is_valid_filename(new_name)?;
        let (parent, item) = self.lookup_existing(path)?;
        if item.name == new_name {
            return Ok(());
        }
        self.create_entry(parent, new_name, item.entry.clone())?;
        self.remove_slots(parent, &item)?;
        info!("Renamed {} to {:?}", normalize_path(path), new_name);
        Ok(())
    }

    /// Move the entry at `src` into the directory `dst_dir`, keeping its name.
    pub fn move_entry(&mut self, src: &str, dst_dir: &str) -> PhatResult<()> {
        self.begin_write()?;
        let src_path = normalize_path(src);
        let dst_path = normalize_path(dst_dir);
        let (parent, item) = self.lookup_existing(src)?;
        let target = self.resolve_dir(dst_dir)?;

        if item.is_directory() && (dst_path == src_path || dst_path.starts_with(&format!("{}/", src_path))) {
            return Err(PhatError::InvalidPath(format!("cannot move {} into itself", src_path)));
        }
        if target == parent {
            return Ok(());
        }

        self.create_entry(target, &item.name, item.entry.clone())?;
        self.remove_slots(parent, &item)?;

        if item.is_directory() {
            let mut cursor = DirCursor::new(item.first_cluster());
            if let Some(DirRecord::Short(mut dotdot)) = self.read_slot(&mut cursor, 1)? {
                if dotdot.name == DOTDOT_NAME {
                    dotdot.first_cluster = self.dotdot_cluster(target);
                    self.write_slot(&mut cursor, 1, &dotdot.to_bytes())?;
                }
            }
        }
        info!("Moved {} to {}", src_path, dst_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat_common::lfn_checksum;
    use crate::fat_common::DirRecord;
    use crate::test_helpers::formatted_volume;

    fn names(items: &[DirItem]) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[test]
    fn test_short_name_needs_one_slot() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/README.TXT", b"x").unwrap();
        let items = volume.read_dir("/").unwrap();
        assert_eq!(names(&items), vec!["README.TXT"]);
        assert_eq!((items[0].first_slot, items[0].short_slot), (0, 0));
        assert_eq!(items[0].short_name(), b"README  TXT");
    }

    #[test]
    fn test_long_name_checksums() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/The Biography of John Wok.txt", b"x").unwrap();
        let items = volume.read_dir("/").unwrap();
        assert_eq!(items[0].name, "The Biography of John Wok.txt");
        assert_eq!(items[0].short_name(), b"THEBIO~1TXT");
        assert_eq!((items[0].first_slot, items[0].short_slot), (0, 3));

        let checksum = lfn_checksum(items[0].short_name());
        let mut cursor = DirCursor::new(0);
        for slot in 0..3 {
            match volume.read_slot(&mut cursor, slot).unwrap() {
                Some(DirRecord::Lfn(lfn)) => assert_eq!(lfn.checksum, checksum),
                other => panic!("slot {} holds {:?}", slot, other),
            }
        }
    }

    #[test]
    fn test_lfn_run_straddles_cluster_boundary() {
        // One-sector clusters hold 16 slots
        let mut volume = formatted_volume(2880, 12);
        volume.create_directory("/d").unwrap();
        for i in 0..12 {
            volume.write_file(&format!("/d/F{}", i), b"").unwrap();
        }
        let start = volume.resolve_dir("/d").unwrap();
        assert_eq!(volume.cluster_chain(start).unwrap().len(), 1);

        let long = "Straddling entry.txt";
        volume.write_file(&format!("/d/{}", long), b"x").unwrap();
        assert_eq!(volume.cluster_chain(start).unwrap().len(), 2);

        let items = volume.read_dir("/d").unwrap();
        let item = items.last().unwrap();
        assert_eq!(item.name, long);
        assert_eq!((item.first_slot, item.short_slot), (14, 16));
        assert_eq!(volume.read_file(&format!("/d/{}", long)).unwrap(), b"x");

        // The freshly grown cluster ends right after the short entry
        volume.write_file("/d/AFTER", b"").unwrap();
        let items = volume.read_dir("/d").unwrap();
        assert_eq!(items.last().unwrap().short_slot, 17);
    }

    #[test]
    fn test_colliding_aliases() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/Report Draft One.txt", b"1").unwrap();
        volume.write_file("/Report Draft Two.txt", b"2").unwrap();
        let items = volume.read_dir("/").unwrap();
        assert_eq!(items[0].short_name(), b"REPORT~1TXT");
        assert_eq!(items[1].short_name(), b"REPORT~2TXT");
    }

    #[test]
    fn test_case_clash_gets_alias() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/README.TXT", b"a").unwrap();
        volume.write_file("/readme.txt", b"b").unwrap();
        let items = volume.read_dir("/").unwrap();
        assert_eq!(names(&items), vec!["README.TXT", "readme.txt"]);
        assert_eq!(items[1].short_name(), b"README~1TXT");
    }

    #[test]
    fn test_existing_name_conflicts() {
        let mut volume = formatted_volume(2880, 12);
        volume.create_directory("/dir").unwrap();
        volume.write_file("/file", b"").unwrap();
        assert!(matches!(volume.create_directory("/dir"), Err(PhatError::DirectoryAlreadyExists(_))));
        assert!(matches!(volume.create_directory("/file"), Err(PhatError::FileAlreadyExists(_))));
        assert!(matches!(volume.create_directory("/file/sub"), Err(PhatError::NotADirectory(_))));
    }

    #[test]
    fn test_trailing_dot_keeps_its_name() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/a.", b"x").unwrap();
        let root = volume.read_dir("/").unwrap();
        assert_eq!(names(&root), vec!["a."]);
        assert_eq!(root[0].short_name(), b"A~1        ");
        assert_eq!(volume.read_file("/a.").unwrap(), b"x");

        volume.write_file("/a.", b"yz").unwrap();
        assert!(matches!(volume.create_directory("/a."), Err(PhatError::FileAlreadyExists(_))));
        volume.write_file("/a", b"plain").unwrap();
        let root = volume.read_dir("/").unwrap();
        assert_eq!(names(&root), vec!["a.", "a"]);
        assert_eq!(volume.read_file("/a.").unwrap(), b"yz");
        assert_eq!(volume.read_file("/a").unwrap(), b"plain");
    }

    #[test]
    fn test_mkdir_parents_and_dot_entries() {
        let mut volume = formatted_volume(40_000, 16);
        volume.create_directory("/a/b/c").unwrap();
        let a = volume.read_dir("/a").unwrap();
        assert_eq!(names(&a), vec![".", "..", "b"]);
        assert_eq!(a[1].first_cluster(), 0);

        let b = volume.read_dir("/a/b").unwrap();
        assert_eq!(b[0].first_cluster(), a[2].first_cluster());
        assert_eq!(b[1].first_cluster(), a[0].first_cluster());
        assert!(b[2].is_directory());
    }

    #[test]
    fn test_failed_mkdir_releases_cluster() {
        let mut volume = formatted_volume(2880, 12);
        // Fill the 224-slot root region
        for i in 0..224 {
            volume.create_directory(&format!("/D{}", i)).unwrap();
        }
        let free = volume.free_clusters();
        assert!(matches!(volume.create_directory("/overflow"), Err(PhatError::NotEnoughSpace)));
        assert_eq!(volume.free_clusters(), free);
    }

    #[test]
    fn test_remove_directory() {
        let mut volume = formatted_volume(40_000, 16);
        volume.create_directory("/full/inner").unwrap();
        assert!(matches!(volume.remove_directory("/full"), Err(PhatError::DirectoryNotEmpty(_))));

        let free = volume.free_clusters();
        volume.remove_directory("/full/inner").unwrap();
        assert_eq!(volume.free_clusters(), free + 1);
        volume.remove_directory("/full").unwrap();
        assert!(matches!(volume.open_dir("/full"), Err(PhatError::DirectoryNotFound(_))));
        assert!(matches!(volume.remove_directory("/"), Err(PhatError::InvalidPath(_))));
    }

    #[test]
    fn test_delete_file_rules() {
        let mut volume = formatted_volume(40_000, 16);
        volume.create_directory("/d").unwrap();
        assert!(matches!(volume.delete_file("/d"), Err(PhatError::IsADirectory(_))));
        assert!(matches!(volume.delete_file("/missing"), Err(PhatError::FileNotFound(_))));
        volume.write_file("/d/f.bin", &[1u8; 3000]).unwrap();
        volume.delete_file("/d/f.bin").unwrap();
        let items = volume.read_dir("/d").unwrap();
        assert_eq!(names(&items), vec![".", ".."]);
    }

    #[test]
    fn test_deleted_slots_are_reused() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/A Long File Name.txt", b"x").unwrap();
        volume.write_file("/after.txt", b"y").unwrap();
        volume.delete_file("/A Long File Name.txt").unwrap();
        volume.write_file("/B.TXT", b"z").unwrap();
        let items = volume.read_dir("/").unwrap();
        let b = items.iter().find(|i| i.name == "B.TXT").unwrap();
        assert_eq!(b.short_slot, 0);
    }

    #[test]
    fn test_rename() {
        let mut volume = formatted_volume(2880, 12);
        volume.write_file("/old.txt", b"content").unwrap();
        volume.rename("/old.txt", "A much longer name.txt").unwrap();
        assert_eq!(volume.read_file("/A much longer name.txt").unwrap(), b"content");
        assert!(matches!(volume.read_file("/old.txt"), Err(PhatError::FileNotFound(_))));

        volume.write_file("/other.txt", b"").unwrap();
        assert!(matches!(
            volume.rename("/other.txt", "A much longer name.txt"),
            Err(PhatError::FileAlreadyExists(_))
        ));
        assert!(matches!(volume.rename("/other.txt", "bad:name"), Err(PhatError::BadFileName(_))));
    }

    #[test]
    fn test_move_directory_updates_dotdot() {
        let mut volume = formatted_volume(40_000, 16);
        volume.create_directory("/src/child").unwrap();
        volume.create_directory("/dst").unwrap();
        volume.write_file("/src/child/data.txt", b"payload").unwrap();

        volume.move_entry("/src/child", "/dst").unwrap();
        assert_eq!(volume.read_file("/dst/child/data.txt").unwrap(), b"payload");
        assert!(volume.read_dir("/src").unwrap().iter().all(|i| i.is_dot_entry()));

        let dst = volume.read_dir("/").unwrap().into_iter().find(|i| i.name == "dst").unwrap();
        let child = volume.read_dir("/dst/child").unwrap();
        assert_eq!(child[1].first_cluster(), dst.first_cluster());

        volume.move_entry("/dst/child", "/").unwrap();
        let child = volume.read_dir("/child").unwrap();
        assert_eq!(child[1].first_cluster(), 0);
    }

    #[test]
    fn test_move_into_own_subtree() {
        let mut volume = formatted_volume(40_000, 16);
        volume.create_directory("/a/b").unwrap();
        assert!(matches!(volume.move_entry("/a", "/a/b"), Err(PhatError::InvalidPath(_))));
        assert!(matches!(volume.move_entry("/a", "/a"), Err(PhatError::InvalidPath(_))));
        assert!(matches!(volume.move_entry("/", "/a"), Err(PhatError::InvalidPath(_))));
    }
}
