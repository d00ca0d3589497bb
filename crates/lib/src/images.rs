//! Boot image catalog.
//!
//! Tracks the bootable OS entries offered by the boot menu across runs.
//! The catalog is rebuilt from the current storage graph on every
//! invocation; labels assigned by the caller survive the rebuild as long
//! as the underlying device still exists.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::{Context, Result};
use camino::Utf8Path;
use fn_error_context::context;

use crate::platform::{Platform, Variant};
use crate::storage::StorageGraph;

/// Foreign filesystem types a dual-boot menu entry can chainload.
pub const DOS_FILESYSTEMS: &[&str] = &["vfat", "fat16", "fat32", "ntfs", "hpfs"];

/// One bootable OS entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootImage {
    /// Menu label, `None` until the caller assigns one
    pub short_label: Option<String>,
    /// Long descriptive label
    pub long_label: Option<String>,
    /// Filesystem/type tag of the underlying device
    pub fstype: String,
}

/// The catalog of bootable OS entries, keyed by device name.
#[derive(Debug, Default)]
pub struct BootImages {
    images: BTreeMap<String, BootImage>,
    default: Option<String>,
}

impl BootImages {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the catalog against the current graph.
    ///
    /// `probe` reports whether the device at a given path carries a boot
    /// sector; it is injected so the scan can run against fixtures.
    /// Entries for vanished devices are dropped, new foreign-OS devices
    /// come in labeled "Other", and the root device always has an entry.
    /// If no default survives, the root device becomes the default and
    /// gets `product` as its label when it has none.
    pub fn refresh<F>(&mut self, platform: &Platform, graph: &StorageGraph, probe: F, product: &str)
    where
        F: Fn(&str) -> bool,
    {
        let eligible = eligible_devices(platform, graph, probe);

        self.images.retain(|dev, _| eligible.contains_key(dev));
        for (dev, (fstype, foreign)) in &eligible {
            let entry = self.images.entry(dev.clone()).or_insert_with(|| BootImage {
                short_label: foreign.then(|| "Other".to_string()),
                long_label: foreign.then(|| "Other".to_string()),
                fstype: String::new(),
            });
            entry.fstype = fstype.clone();
        }

        let default_ok = self
            .default
            .as_ref()
            .is_some_and(|d| self.images.contains_key(d));
        if !default_ok {
            let root = graph.root_device().name.clone();
            if let Some(entry) = self.images.get_mut(&root) {
                if entry.short_label.is_none() {
                    entry.short_label = Some(product.to_string());
                    entry.long_label = Some(product.to_string());
                }
            }
            self.default = Some(root);
        }
    }

    /// All entries, in stable device-name order.
    pub fn images(&self) -> &BTreeMap<String, BootImage> {
        &self.images
    }

    /// Look up one entry by device name.
    pub fn get(&self, device: &str) -> Option<&BootImage> {
        self.images.get(device)
    }

    /// Assign the labels of an entry.  No-op for unknown devices.
    pub fn set_labels(&mut self, device: &str, short: &str, long: &str) {
        if let Some(entry) = self.images.get_mut(device) {
            entry.short_label = Some(short.to_string());
            entry.long_label = Some(long.to_string());
        }
    }

    /// Mark an entry as the default.  No-op for unknown devices.
    pub fn set_default(&mut self, device: &str) {
        if self.images.contains_key(device) {
            self.default = Some(device.to_string());
        }
    }

    /// The device name of the default entry.
    pub fn default_device(&self) -> Option<&str> {
        self.default.as_deref()
    }
}

/// Devices eligible for a boot menu entry: `name -> (fstype, foreign)`.
fn eligible_devices<F>(
    platform: &Platform,
    graph: &StorageGraph,
    probe: F,
) -> BTreeMap<String, (String, bool)>
where
    F: Fn(&str) -> bool,
{
    let mut out = BTreeMap::new();

    // a HFS volume is only bootable when it directly follows the Apple
    // bootstrap partition on its disk
    let mut prev_was_appleboot: BTreeMap<String, bool> = BTreeMap::new();

    for part in graph.partitions() {
        let Some(fstype) = part.format.fstype.as_deref() else {
            continue;
        };
        let disk = part.disk.clone().unwrap_or_default();
        let follows_bootstrap = prev_was_appleboot.get(&disk).copied().unwrap_or(false);
        prev_was_appleboot.insert(disk, fstype == "appleboot");

        let foreign = if platform.supports_dual_boot() && DOS_FILESYSTEMS.contains(&fstype) {
            probe(&part.path)
        } else if platform.variant() == Variant::PpcNewWorld && matches!(fstype, "hfs" | "hfs+") {
            follows_bootstrap
        } else {
            false
        };
        if foreign {
            out.insert(part.name.clone(), (fstype.to_string(), true));
        }
    }

    let root = graph.root_device();
    let fstype = root.format.fstype.clone().unwrap_or_default();
    out.insert(root.name.clone(), (fstype, false));
    out
}

/// Read the device's first sector and check for the classic boot-block
/// signature (0x55 0xAA at offset 510).
#[context("Probing boot sector of {path}")]
pub fn probe_boot_sector(path: &Utf8Path) -> Result<bool> {
    let mut sector = [0u8; 512];
    let mut f = std::fs::File::open(path).context("Opening device")?;
    f.read_exact(&mut sector).context("Reading first sector")?;
    Ok(sector[510] == 0x55 && sector[511] == 0xAA)
}
