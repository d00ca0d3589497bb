//! The storage device graph consumed by the engine.
//!
//! The graph is collaborator data: it is built once from the detected
//! topology (or handed in by an installer frontend) and the engine only
//! ever reads it.  Nodes carry the attributes the boot policy cares
//! about: device kind, owning disk and its disklabel, format and mount
//! point, size, and dependency edges.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::blockdev::BlockDevice;

/// Filesystem and format types whose contents a boot loader can load
/// a kernel (or boot sector) from.
const BOOTABLE_FORMATS: &[&str] = &[
    "ext2", "ext3", "ext4", "xfs", "btrfs", "vfat", "fat16", "fat32", "hfs", "hfs+", "ntfs",
    "hpfs", "efi", "prepboot", "appleboot",
];

/// The kind of a storage device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceKind {
    /// A whole disk
    Disk,
    /// A partition on a disk
    Partition,
    /// An MD RAID array
    MdArray,
    /// An LVM logical volume
    LvmLv,
    /// A LUKS/dm-crypt mapping
    Crypt,
    /// A multipath aggregate over several physical paths
    Multipath,
    /// Anything else (loop devices, zram, ...)
    Other,
}

/// The format (filesystem or special content) of a device.
#[derive(Debug, Clone, Default)]
pub struct DeviceFormat {
    /// Format type, e.g. `ext4`, `efi`, `prepboot`, `appleboot`
    pub fstype: Option<String>,
    /// Mount point, when the format is mountable and mounted
    pub mountpoint: Option<String>,
}

impl DeviceFormat {
    /// Whether a boot loader can load anything from this format.
    pub fn bootable(&self) -> bool {
        self.fstype
            .as_deref()
            .is_some_and(|t| BOOTABLE_FORMATS.contains(&t))
    }
}

/// A node in the storage device graph.
#[derive(Debug, Clone)]
pub struct StorageDevice {
    /// Kernel device name, e.g. `sda1`
    pub name: String,
    /// Device node path, e.g. `/dev/sda1`
    pub path: String,
    /// What this device is
    pub kind: DeviceKind,
    /// RAID level, for MD arrays
    pub raid_level: Option<u32>,
    /// Whether this is a logical partition (MBR extended container)
    pub is_logical: bool,
    /// Name of the owning disk, for partitions
    pub disk: Option<String>,
    /// Disklabel type of the owning disk (`msdos`, `gpt`, `mac`, ...)
    pub disklabel: Option<String>,
    /// Device size in MiB
    pub size_mib: f64,
    /// Starting sector (512-byte units), for partitions
    pub start_sector: Option<u64>,
    /// The device contents
    pub format: DeviceFormat,
    /// Names of the devices this one is directly built from
    pub parents: Vec<String>,
    /// Early-boot setup arguments required to assemble this device
    /// (dracut-style), as provided by the storage backend
    pub dracut_setup_args: Vec<String>,
    /// How the device is referred to in fstab: a `UUID=`/`LABEL=` spec
    /// or a raw device path
    pub fstab_spec: String,
}

impl StorageDevice {
    /// A minimal device node; tests and frontends fill in the rest.
    pub fn new(name: &str, kind: DeviceKind) -> Self {
        Self {
            name: name.to_string(),
            path: format!("/dev/{name}"),
            kind,
            raid_level: None,
            is_logical: false,
            disk: None,
            disklabel: None,
            size_mib: 0.0,
            start_sector: None,
            format: DeviceFormat::default(),
            parents: Vec::new(),
            dracut_setup_args: Vec::new(),
            fstab_spec: format!("/dev/{name}"),
        }
    }

    /// End of the device in MiB from the start of its disk, when known.
    pub fn end_mib(&self) -> Option<f64> {
        let start = self.start_sector? as f64 * 512.0 / (1024.0 * 1024.0);
        Some(start + self.size_mib)
    }
}

/// The read-only storage device graph.
#[derive(Debug, Clone)]
pub struct StorageGraph {
    devices: Vec<StorageDevice>,
    root: String,
    drive_order: Vec<String>,
}

impl StorageGraph {
    /// Build a graph from a device list.  `root` names the device holding
    /// the root filesystem.
    pub fn new(devices: Vec<StorageDevice>, root: &str) -> Result<Self> {
        if !devices.iter().any(|d| d.name == root) {
            return Err(anyhow!("root device {root} not in device list"));
        }
        // multipath aggregates count as drives; the boot disk on a
        // multipath system is the aggregate, not a path member
        let mut drive_order: Vec<String> = devices
            .iter()
            .filter(|d| {
                matches!(d.kind, DeviceKind::Disk | DeviceKind::Multipath)
                    && d.disklabel.is_some()
            })
            .map(|d| d.name.clone())
            .collect();
        drive_order.sort();
        Ok(Self {
            devices,
            root: root.to_string(),
            drive_order,
        })
    }

    /// Build a graph from lsblk output trees.  The root device is the one
    /// mounted at `/`.
    pub fn from_lsblk(trees: &[BlockDevice]) -> Result<Self> {
        let mut devices = Vec::new();
        for tree in trees {
            flatten_lsblk(tree, None, &mut devices);
        }
        let root = devices
            .iter()
            .find(|d| d.format.mountpoint.as_deref() == Some("/"))
            .map(|d| d.name.clone())
            .ok_or_else(|| anyhow!("no device is mounted at /"))?;
        Self::new(devices, &root)
    }

    /// All devices in the graph.
    pub fn devices(&self) -> &[StorageDevice] {
        &self.devices
    }

    /// Look up a device by name.
    pub fn get(&self, name: &str) -> Option<&StorageDevice> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// The device holding the root filesystem.
    pub fn root_device(&self) -> &StorageDevice {
        // The constructor guarantees membership
        self.get(&self.root).expect("root device present")
    }

    /// Map of mount points to the devices mounted there.
    pub fn mountpoints(&self) -> HashMap<&str, &StorageDevice> {
        self.devices
            .iter()
            .filter_map(|d| d.format.mountpoint.as_deref().map(|m| (m, d)))
            .collect()
    }

    /// The device mounted at the given path.
    pub fn device_at(&self, mountpoint: &str) -> Option<&StorageDevice> {
        self.devices
            .iter()
            .find(|d| d.format.mountpoint.as_deref() == Some(mountpoint))
    }

    /// The device holding `/boot`, falling back to the root device.
    pub fn boot_mount_device(&self) -> &StorageDevice {
        self.device_at("/boot").unwrap_or_else(|| self.root_device())
    }

    /// Whether device `a` is (transitively) built on top of device `b`.
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let Some(dev) = self.get(a) else {
            return false;
        };
        let mut stack: Vec<&str> = dev.parents.iter().map(|s| s.as_str()).collect();
        while let Some(p) = stack.pop() {
            if p == b {
                return true;
            }
            if let Some(pd) = self.get(p) {
                stack.extend(pd.parents.iter().map(|s| s.as_str()));
            }
        }
        false
    }

    /// All existing partitions, in on-disk order: grouped by owning
    /// disk, ordered by start sector.  Partitions without a known start
    /// sector sort last within their disk, by name (numerically, so
    /// `sda10` follows `sda9`).
    pub fn partitions(&self) -> impl Iterator<Item = &StorageDevice> {
        fn key(d: &StorageDevice) -> (Option<&str>, u64, usize, &str) {
            (
                d.disk.as_deref(),
                d.start_sector.unwrap_or(u64::MAX),
                d.name.len(),
                d.name.as_str(),
            )
        }
        let mut parts: Vec<&StorageDevice> = self
            .devices
            .iter()
            .filter(|d| d.kind == DeviceKind::Partition)
            .collect();
        parts.sort_by(|a, b| key(a).cmp(&key(b)));
        parts.into_iter()
    }

    /// The deterministic drive-priority list: disks carrying a disklabel,
    /// sorted, with any caller-preferred drives first.
    pub fn drives(&self) -> &[String] {
        &self.drive_order
    }

    /// Move the named drives to the head of the priority list, in the
    /// given order.  Unknown names are ignored; all other drives follow
    /// in their existing order.
    pub fn update_drive_list(&mut self, preferred: &[String]) {
        for name in preferred.iter().rev() {
            if let Some(pos) = self.drive_order.iter().position(|d| d == name) {
                let ele = self.drive_order.remove(pos);
                self.drive_order.insert(0, ele);
            }
        }
    }
}

fn map_kind(devtype: &str) -> DeviceKind {
    match devtype {
        "disk" => DeviceKind::Disk,
        "part" => DeviceKind::Partition,
        "crypt" => DeviceKind::Crypt,
        "lvm" => DeviceKind::LvmLv,
        "mpath" => DeviceKind::Multipath,
        t if t.starts_with("raid") => DeviceKind::MdArray,
        _ => DeviceKind::Other,
    }
}

fn flatten_lsblk(node: &BlockDevice, parent: Option<&StorageDevice>, out: &mut Vec<StorageDevice>) {
    let kind = map_kind(&node.devtype);
    let raid_level = node
        .devtype
        .strip_prefix("raid")
        .and_then(|l| l.parse().ok());
    // Owning disk attributes only flow from an immediate disk (or
    // multipath) parent; stacked devices have no single owning disk.
    let disk_parent = parent.filter(|p| matches!(p.kind, DeviceKind::Disk | DeviceKind::Multipath));
    let fstab_spec = node
        .uuid
        .as_deref()
        .map(|u| format!("UUID={u}"))
        .unwrap_or_else(|| node.path());
    let dev = StorageDevice {
        name: node.name.clone(),
        path: node.path(),
        kind,
        raid_level,
        is_logical: false,
        disk: disk_parent.map(|p| p.name.clone()),
        disklabel: disk_parent.and_then(|p| p.disklabel.clone()).or_else(|| {
            if kind == DeviceKind::Disk {
                node.pttype.clone()
            } else {
                None
            }
        }),
        size_mib: node.size as f64 / (1024.0 * 1024.0),
        start_sector: node.start,
        format: DeviceFormat {
            fstype: node.fstype.clone(),
            mountpoint: node.mountpoint.clone(),
        },
        parents: parent.map(|p| vec![p.name.clone()]).unwrap_or_default(),
        dracut_setup_args: Vec::new(),
        fstab_spec,
    };
    for child in node.children.iter().flatten() {
        flatten_lsblk(child, Some(&dev), out);
    }
    out.push(dev);
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Small graph fixtures shared by the policy and builder tests.
    use super::*;

    /// disk sda (msdos) with sda1 -> /boot (ext4) and sda2 -> / (ext4)
    pub(crate) fn simple_graph() -> StorageGraph {
        let mut sda = StorageDevice::new("sda", DeviceKind::Disk);
        sda.disklabel = Some("msdos".into());
        sda.size_mib = 40960.0;

        let mut sda1 = StorageDevice::new("sda1", DeviceKind::Partition);
        sda1.disk = Some("sda".into());
        sda1.disklabel = Some("msdos".into());
        sda1.parents = vec!["sda".into()];
        sda1.size_mib = 500.0;
        sda1.start_sector = Some(2048);
        sda1.format = DeviceFormat {
            fstype: Some("ext4".into()),
            mountpoint: Some("/boot".into()),
        };
        sda1.fstab_spec = "UUID=1111-2222".into();

        let mut sda2 = StorageDevice::new("sda2", DeviceKind::Partition);
        sda2.disk = Some("sda".into());
        sda2.disklabel = Some("msdos".into());
        sda2.parents = vec!["sda".into()];
        sda2.size_mib = 40000.0;
        sda2.format = DeviceFormat {
            fstype: Some("ext4".into()),
            mountpoint: Some("/".into()),
        };
        sda2.fstab_spec = "UUID=3333-4444".into();

        StorageGraph::new(vec![sda, sda1, sda2], "sda2").unwrap()
    }

    /// gpt disk with an EFI system partition and a root partition
    pub(crate) fn efi_graph() -> StorageGraph {
        let mut vda = StorageDevice::new("vda", DeviceKind::Disk);
        vda.disklabel = Some("gpt".into());

        let mut esp = StorageDevice::new("vda1", DeviceKind::Partition);
        esp.disk = Some("vda".into());
        esp.disklabel = Some("gpt".into());
        esp.parents = vec!["vda".into()];
        esp.size_mib = 200.0;
        esp.format = DeviceFormat {
            fstype: Some("efi".into()),
            mountpoint: Some("/boot/efi".into()),
        };

        let mut root = StorageDevice::new("vda2", DeviceKind::Partition);
        root.disk = Some("vda".into());
        root.disklabel = Some("gpt".into());
        root.parents = vec!["vda".into()];
        root.size_mib = 20000.0;
        root.format = DeviceFormat {
            fstype: Some("ext4".into()),
            mountpoint: Some("/".into()),
        };
        root.fstab_spec = "UUID=aaaa-bbbb".into();

        StorageGraph::new(vec![vda, esp, root], "vda2").unwrap()
    }
}
