// Cluster allocator and chain walking
// Linear first-fit allocation from the next-free hint with wrap-around; the
// free count and hint are mirrored into FSInfo after every change.

use log::{debug, trace, warn};
use phat_core::{BlockDevice, PhatError, PhatResult, SECTOR_SIZE};

use crate::fat_common::constants::FIRST_DATA_CLUSTER;
use crate::fat_table::FatEntry;
use crate::volume::Volume;

impl<D: BlockDevice> Volume<D> {
    /// Count free clusters and find the first one with a full FAT scan.
    pub(crate) fn scan_free_clusters(&mut self) -> PhatResult<(u32, Option<u32>)> {
        let mut free = 0;
        let mut first = None;
        for cluster in FIRST_DATA_CLUSTER..=self.geometry.max_valid_cluster {
            if self.read_fat_raw(cluster)? == 0 {
                free += 1;
                first.get_or_insert(cluster);
            }
        }
        debug!("FAT scan: {} free clusters, first at {:?}", free, first);
        Ok((free, first))
    }

    fn find_free_from(&mut self, start: u32) -> PhatResult<Option<u32>> {
        let max = self.geometry.max_valid_cluster;
        let start = if self.geometry.is_valid_cluster(start) { start } else { FIRST_DATA_CLUSTER };
        for cluster in (start..=max).chain(FIRST_DATA_CLUSTER..start) {
            if self.read_fat_raw(cluster)? == 0 {
                return Ok(Some(cluster));
            }
        }
        Ok(None)
    }

    /// Take one free cluster and mark it end-of-chain. With `near`, the
    /// search starts just after that cluster to keep chains contiguous.
    pub(crate) fn allocate_cluster(&mut self, near: Option<u32>) -> PhatResult<u32> {
        let start = near.map_or(self.next_free, |c| c + 1);
        let cluster = match self.find_free_from(start)? {
            Some(cluster) => cluster,
            None => {
                self.next_free = FIRST_DATA_CLUSTER;
                self.free_clusters = 0;
                return Err(PhatError::NotEnoughSpace);
            }
        };

        self.write_fat(cluster, FatEntry::EndOfChain)?;
        if self.free_clusters == 0 {
            warn!("Free cluster count was stale; rescan on next mount");
        } else {
            self.free_clusters -= 1;
        }
        self.next_free = if cluster >= self.geometry.max_valid_cluster {
            FIRST_DATA_CLUSTER
        } else {
            cluster + 1
        };
        self.persist_fs_info()?;
        trace!("Allocated cluster {}", cluster);
        Ok(cluster)
    }

    /// Link a fresh cluster after `last` and return it.
    pub(crate) fn extend_chain(&mut self, last: u32) -> PhatResult<u32> {
        let cluster = self.allocate_cluster(Some(last))?;
        if let Err(e) = self.write_fat(last, FatEntry::Next(cluster)) {
            self.release_cluster(cluster);
            return Err(e);
        }
        Ok(cluster)
    }

    /// Best-effort cleanup of an allocated but unlinked cluster.
    pub(crate) fn release_cluster(&mut self, cluster: u32) {
        if let Err(e) = self.free_chain(cluster) {
            warn!("Could not release cluster {}: {}", cluster, e);
        }
    }

    /// Next link of a chain; `EndOfFatChain` at the end.
    pub(crate) fn next_cluster(&mut self, cluster: u32) -> PhatResult<u32> {
        match self.read_fat(cluster)? {
            FatEntry::Next(next) => Ok(next),
            FatEntry::EndOfChain => Err(PhatError::EndOfFatChain),
            other => Err(PhatError::FatError(format!(
                "cluster {} links to {:?}",
                cluster, other
            ))),
        }
    }

    /// Return every cluster of the chain starting at `start` to the free pool.
    /// The whole chain is walked first; a broken or looping chain leaves the
    /// FAT untouched.
    pub(crate) fn free_chain(&mut self, start: u32) -> PhatResult<u32> {
        let chain = self.cluster_chain(start).map_err(|e| match e {
            PhatError::FatError(msg) => {
                PhatError::FatError(format!("chain from {} is broken: {}", start, msg))
            }
            other => other,
        })?;
        for &cluster in &chain {
            self.write_fat(cluster, FatEntry::Free)?;
            if cluster < self.next_free {
                self.next_free = cluster;
            }
        }
        let freed = chain.len() as u32;
        self.free_clusters = self.free_clusters.saturating_add(freed);
        self.persist_fs_info()?;
        debug!("Freed {} clusters from {}", freed, start);
        Ok(freed)
    }

    /// Cut a chain after `last`, freeing whatever followed it.
    pub(crate) fn truncate_chain(&mut self, last: u32) -> PhatResult<()> {
        match self.next_cluster(last) {
            Ok(rest) => {
                self.free_chain(rest)?;
                self.write_fat(last, FatEntry::EndOfChain)
            }
            Err(PhatError::EndOfFatChain) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Every cluster of a chain, in order.
    pub fn cluster_chain(&mut self, start: u32) -> PhatResult<Vec<u32>> {
        let mut chain = vec![start];
        let mut cluster = start;
        self.read_fat(start)?;
        loop {
            match self.next_cluster(cluster) {
                Ok(next) => {
                    if chain.len() > self.geometry.max_valid_cluster as usize {
                        return Err(PhatError::FatError(format!("chain from {} loops", start)));
                    }
                    chain.push(next);
                    cluster = next;
                }
                Err(PhatError::EndOfFatChain) => return Ok(chain),
                Err(e) => return Err(e),
            }
        }
    }

    /// Zero every sector of a cluster on the device.
    pub(crate) fn wipe_cluster(&mut self, cluster: u32) -> PhatResult<()> {
        let lba = self.geometry.cluster_to_lba(cluster);
        let zeros = vec![0u8; self.geometry.sectors_per_cluster as usize * SECTOR_SIZE];
        self.cache.write_direct(&mut self.device, lba, &zeros)
    }
}
