//! Typed access to the system block device topology as reported by
//! util-linux (`lsblk` and `sfdisk`).  This is the raw material from
//! which the boot configuration engine builds its storage graph.

use std::process::Command;

use anyhow::{anyhow, Context, Result};
use camino::Utf8Path;
use fn_error_context::context;
use serde::Deserialize;

use bootsynth_utils::CommandRunExt;

#[derive(Debug, Deserialize)]
struct LsBlkOutput {
    blockdevices: Vec<BlockDevice>,
}

/// A node in the `lsblk` output tree.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDevice {
    /// Kernel device name, e.g. `sda1`
    pub name: String,
    /// Device type as reported by lsblk: `disk`, `part`, `crypt`,
    /// `lvm`, `raid1`, `mpath`, ...
    #[serde(rename = "type")]
    pub devtype: String,
    /// Device size in bytes
    pub size: u64,
    /// Partition table type of this device (`gpt`, `dos`, `mac`, ...)
    pub pttype: Option<String>,
    /// Filesystem (or other format) type of the device contents
    pub fstype: Option<String>,
    /// Filesystem label
    pub label: Option<String>,
    /// Filesystem UUID
    pub uuid: Option<String>,
    /// Where the device is mounted, if anywhere
    pub mountpoint: Option<String>,
    /// Major:minor device number
    #[serde(rename = "maj:min")]
    pub maj_min: Option<String>,
    // NOTE this one is not available on older util-linux, and
    // will also not exist for whole blockdevs (as opposed to partitions).
    /// Starting sector of a partition
    pub start: Option<u64>,
    /// Full path to the device node
    pub path: Option<String>,
    /// Devices stacked on top of this one
    pub children: Option<Vec<BlockDevice>>,
}

impl BlockDevice {
    /// Full path to the device node.
    // RHEL8's lsblk doesn't have PATH, so we do it
    pub fn path(&self) -> String {
        self.path.clone().unwrap_or(format!("/dev/{}", &self.name))
    }

    /// Whether other devices are stacked on top of this one.
    pub fn has_children(&self) -> bool {
        self.children.as_ref().is_some_and(|v| !v.is_empty())
    }

    // The "start" property was only added to lsblk relatively recently;
    // on older util-linux we read it out of sysfs instead.
    fn backfill_start(&mut self) -> Result<()> {
        if self.start.is_some() {
            return Ok(());
        }
        let Some(majmin) = self.maj_min.as_deref() else {
            // This shouldn't happen
            return Ok(());
        };
        let sysfs_start_path = format!("/sys/dev/block/{majmin}/start");
        if Utf8Path::new(&sysfs_start_path).try_exists()? {
            let start = std::fs::read_to_string(&sysfs_start_path)
                .with_context(|| format!("Reading {sysfs_start_path}"))?;
            tracing::debug!("backfilled start to {start}");
            self.start = Some(
                start
                    .trim()
                    .parse()
                    .context("Parsing sysfs start property")?,
            );
        }
        Ok(())
    }

    /// Older versions of util-linux may be missing some properties. Backfill them if they're missing.
    pub fn backfill_missing(&mut self) -> Result<()> {
        // Add new properties to backfill here
        self.backfill_start()?;
        // And recurse to child devices
        for child in self.children.iter_mut().flatten() {
            child.backfill_missing()?;
        }
        Ok(())
    }

    /// Iterate over this device and all transitive children, depth first.
    pub fn iter_with_children(&self) -> impl Iterator<Item = &BlockDevice> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            for child in next.children.iter().flatten() {
                stack.push(child);
            }
            Some(next)
        })
    }
}

/// Enumerate all block devices on the system.
#[context("Listing block devices")]
pub fn list_all() -> Result<Vec<BlockDevice>> {
    let mut out: LsBlkOutput = Command::new("lsblk")
        .args(["-J", "-b", "-O"])
        .log_debug()
        .run_and_parse_json()?;
    for dev in out.blockdevices.iter_mut() {
        dev.backfill_missing()?;
    }
    Ok(out.blockdevices)
}

#[derive(Debug, Deserialize)]
struct SfDiskOutput {
    partitiontable: PartitionTable,
}

/// A single partition from an sfdisk partition table dump.
#[derive(Debug, Deserialize)]
pub struct Partition {
    /// Device node of the partition
    pub node: String,
    /// Starting sector
    pub start: u64,
    /// Size in sectors
    pub size: u64,
    /// Partition type GUID or id
    #[serde(rename = "type")]
    pub parttype: String,
    /// Partition UUID, when the label type has one
    pub uuid: Option<String>,
    /// Partition name, when the label type has one
    pub name: Option<String>,
}

impl Partition {
    /// Path to the partition device node.
    pub fn path(&self) -> &Utf8Path {
        self.node.as_str().into()
    }
}

/// The partition table (disk label) of a disk.
#[derive(Debug, Deserialize)]
pub struct PartitionTable {
    /// The label type: `gpt`, `dos`, ...
    pub label: String,
    /// Disk identifier
    pub id: String,
    /// The disk holding this table
    pub device: String,
    /// The partitions, in on-disk order
    pub partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Find the partition with the given device node path.
    pub fn find<'a>(&'a self, devname: &str) -> Option<&'a Partition> {
        self.partitions.iter().find(|p| p.node.as_str() == devname)
    }

    /// Find the 1-based partition number of the given device node path.
    /// This is the numbering scheme used by e.g. `efibootmgr -p`.
    pub fn partno_of(&self, devname: &str) -> Option<u32> {
        self.partitions
            .iter()
            .position(|p| p.node.as_str() == devname)
            .map(|i| i as u32 + 1)
    }

    /// Find the partition with the given 1-based number.
    pub fn find_partno(&self, partno: u32) -> Result<&Partition> {
        let idx = partno
            .checked_sub(1)
            .ok_or_else(|| anyhow!("Invalid 0 partition number"))?;
        self.partitions
            .get(idx as usize)
            .ok_or_else(|| anyhow!("Missing partition for index {partno}"))
    }
}

/// Read the partition table of the target disk.
#[context("Listing partitions of {dev}")]
pub fn partitions_of(dev: &Utf8Path) -> Result<PartitionTable> {
    let o: SfDiskOutput = Command::new("sfdisk")
        .args(["-J", dev.as_str()])
        .log_debug()
        .run_and_parse_json()?;
    Ok(o.partitiontable)
}
