//! Firmware boot entry management.
//!
//! Mirrors the synthesized configuration into the firmware's own boot
//! entry store via `efibootmgr`.  The tool exposes no aggregate status,
//! so operations creating several entries return the result of the last
//! call only.

use std::process::Command;
use std::sync::OnceLock;

use anyhow::Result;
use bootsynth_utils::CommandRunExt;
use fn_error_context::context;
use regex::Regex;
use tracing::debug;

use crate::storage::{DeviceKind, StorageGraph};

/// Loader path written into newly created firmware entries.
pub const DEFAULT_LOADER: &str = "\\EFI\\redhat\\grub.efi";

/// Manages firmware boot entries for one product label.
#[derive(Debug)]
pub struct EfiManager {
    product: String,
    /// Memoized firmware path of the product's boot entry
    product_path: Option<String>,
}

impl EfiManager {
    /// A manager for entries labeled `product`.
    pub fn new(product: &str) -> Self {
        Self {
            product: product.to_string(),
            product_path: None,
        }
    }

    /// Delete every firmware entry whose description exactly matches the
    /// product label.  A failed delete aborts the sweep.
    #[context("Removing stale firmware entries")]
    pub fn remove_stale_entries(&self) -> Result<()> {
        let listing = Command::new("efibootmgr").log_debug().run_get_string()?;
        for id in matching_entry_ids(&listing, &self.product) {
            debug!("deleting firmware entry {id} ({})", self.product);
            Command::new("efibootmgr")
                .args(["-b", &id, "-B"])
                .log_debug()
                .run_capture_stderr()?;
        }
        Ok(())
    }

    /// Create a firmware entry for the boot partition, one per physical
    /// member when the owning disk is multipath-aggregated.
    ///
    /// Only the last create's result is returned; earlier member failures
    /// are logged and lost, which is all the underlying tool supports.
    #[context("Adding firmware entry for {boot_partition}")]
    pub fn add_entry(
        &self,
        graph: &StorageGraph,
        boot_partition: &str,
        partition_number: u32,
        loader: &str,
    ) -> Result<()> {
        let disks = physical_disks(graph, boot_partition);
        if disks.is_empty() {
            anyhow::bail!("no physical disk found for {boot_partition}");
        }
        let mut last = Ok(());
        for disk in disks {
            if let Err(e) = &last {
                debug!("continuing past firmware entry failure: {e}");
            }
            last = Command::new("efibootmgr")
                .args(["-c", "-w", "-L", &self.product, "-d", &disk])
                .args(["-p", &partition_number.to_string(), "-l", loader])
                .log_debug()
                .run_capture_stderr();
        }
        last
    }

    /// The firmware path of the product's boot entry, e.g.
    /// `HD(4,2c8800,64000,902c...)`.  Memoized; pass `force` to bypass
    /// the cache and re-query the firmware.
    #[context("Querying firmware product path")]
    pub fn product_path(&mut self, force: bool) -> Result<Option<String>> {
        if !force {
            if let Some(path) = &self.product_path {
                return Ok(Some(path.clone()));
            }
        }
        let listing = Command::new("efibootmgr")
            .arg("-v")
            .log_debug()
            .run_get_string()?;
        self.product_path = parse_product_path(&listing, &self.product);
        Ok(self.product_path.clone())
    }
}

/// Entry ids (the four hex digits) of listing lines whose description
/// exactly equals `product`.
fn matching_entry_ids(listing: &str, product: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        let Some(first) = fields.next() else {
            continue;
        };
        let desc = fields.collect::<Vec<_>>().join(" ");
        if desc != product {
            continue;
        }
        if let Some(id) = first.strip_prefix("Boot").map(|f| f.trim_end_matches('*')) {
            if id.len() == 4 && id.chars().all(|c| c.is_ascii_hexdigit()) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

/// Extract the drive path from the verbose listing line naming `product`:
/// everything from the last occurrence of the label up to the end of the
/// first parenthesized element.
fn parse_product_path(listing: &str, product: &str) -> Option<String> {
    static PATH_RE: OnceLock<Regex> = OnceLock::new();
    let re = PATH_RE.get_or_init(|| Regex::new(r"(.*?\(.*?\)).*").unwrap());

    let line = listing
        .lines()
        .map(str::trim)
        .find(|l| l.contains(product))?;
    let tail = line[line.rfind(product)? + product.len()..].trim();
    re.captures(tail).map(|c| c[1].to_string())
}

/// The physical disks carrying a partition: the owning disk, expanded to
/// each member path when that disk is a multipath aggregate.
fn physical_disks(graph: &StorageGraph, partition: &str) -> Vec<String> {
    let Some(disk) = graph.get(partition).and_then(|p| p.disk.as_deref()) else {
        return Vec::new();
    };
    let Some(disk) = graph.get(disk) else {
        return Vec::new();
    };
    if disk.kind == DeviceKind::Multipath {
        disk.parents
            .iter()
            .filter_map(|m| graph.get(m))
            .map(|m| m.path.clone())
            .collect()
    } else {
        vec![disk.path.clone()]
    }
}
