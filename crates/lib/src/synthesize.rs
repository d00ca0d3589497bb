//! Boot loader configuration synthesis.
//!
//! Reads the persisted configuration (when present), merges in the wanted
//! kernel and chainload entries, and atomically rewrites it.  The previous
//! file is renamed to a backup, never deleted, so a crash mid-write loses
//! nothing.

use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use tracing::{debug, warn};

use crate::parsers::loader_conf::{LoaderConf, Stanza, StanzaKind};
use crate::storage::StorageGraph;
use crate::Error;

/// Permissions used when no previous configuration exists.
const DEFAULT_MODE: u32 = 0o600;
/// Boot menu timeout in deciseconds, and its serial-console variant.
const DEFAULT_TIMEOUT: u32 = 20;
const SERIAL_TIMEOUT: u32 = 5;

/// A kernel image that should have a boot entry.
#[derive(Debug, Clone)]
pub struct WantedKernel {
    /// Kernel version string, e.g. `2.6.32-71.el6.x86_64`
    pub version: String,
    /// Menu label
    pub label: String,
}

/// A foreign OS that should have a chainload entry.
#[derive(Debug, Clone)]
pub struct WantedChain {
    /// Name of the device holding the OS, as known to the graph
    pub device: String,
    /// Menu label; entries with an empty label are skipped
    pub label: String,
}

/// Synthesizes the persisted configuration document.
#[derive(Debug)]
pub struct Synthesizer<'a> {
    graph: &'a StorageGraph,
    /// Filesystem root everything is resolved under (the install root)
    root: Utf8PathBuf,
    /// Configuration path, absolute within `root`
    config_path: Utf8PathBuf,
    serial: bool,
}

impl<'a> Synthesizer<'a> {
    /// A synthesizer writing `config_path` (an absolute path interpreted
    /// under `root`).
    pub fn new(graph: &'a StorageGraph, root: &Utf8Path, config_path: &Utf8Path) -> Self {
        Self {
            graph,
            root: root.to_owned(),
            config_path: config_path.to_owned(),
            serial: false,
        }
    }

    /// Mark this as a serial-console install, which shortens the default
    /// boot menu timeout.
    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    fn resolve(&self, path: &str) -> Utf8PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn on_disk(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    /// The initrd naming conventions, oldest first; the first one present
    /// on disk wins.
    fn find_initrd(&self, version: &str) -> Option<String> {
        [
            format!("/boot/initrd-{version}.img"),
            format!("/boot/initramfs-{version}.img"),
        ]
        .into_iter()
        .find(|p| self.on_disk(p))
    }

    /// Build and persist the configuration document.
    ///
    /// `default_device` is the boot-selected default device name; when it
    /// differs from the root device the first chainload entry becomes the
    /// default instead of the first kernel.  `kernel_args` is the
    /// argument string every kernel entry carries.
    #[context("Synthesizing boot loader configuration")]
    pub fn synthesize(
        &self,
        kernels: &[WantedKernel],
        chain: &[WantedChain],
        default_device: &str,
        kernel_args: &str,
    ) -> Result<LoaderConf> {
        if kernels.is_empty() {
            return Err(Error::NoBootableKernel.into());
        }

        let config = self.resolve(self.config_path.as_str());
        let (mut doc, mode) = self.read_existing(&config)?;

        self.prune_stale_images(&mut doc);
        self.ensure_globals(&mut doc);
        self.set_default_label(&mut doc, kernels, chain, default_device);
        self.add_kernel_stanzas(&mut doc, kernels, kernel_args);
        self.add_chain_stanzas(&mut doc, chain);
        prune_colliding_aliases(&mut doc);
        check_single_key(&mut doc);

        self.write(&config, &doc, mode)?;
        Ok(doc)
    }

    /// Parse the existing document and move it aside.  The backup rename
    /// is best-effort; a failure is logged and synthesis continues.
    fn read_existing(&self, config: &Utf8Path) -> Result<(LoaderConf, u32)> {
        if !config.exists() {
            return Ok((LoaderConf::default(), DEFAULT_MODE));
        }
        let contents =
            std::fs::read_to_string(config).with_context(|| format!("Reading {config}"))?;
        let doc = LoaderConf::parse(&contents)?;
        let mode = std::fs::metadata(config.as_std_path())
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(DEFAULT_MODE);

        let backup = Utf8PathBuf::from(format!("{config}.bak"));
        if let Err(e) = std::fs::rename(config, &backup) {
            warn!("failed to back up {config} to {backup}: {e}");
        } else {
            debug!("moved {config} to {backup}");
        }
        Ok((doc, mode))
    }

    /// Drop image stanzas whose kernel no longer exists on disk.
    fn prune_stale_images(&self, doc: &mut LoaderConf) {
        doc.stanzas.retain(|s| {
            let keep = s.kind != StanzaKind::Image || self.on_disk(&s.target);
            if !keep {
                debug!("dropping stale boot entry for {}", s.target);
            }
            keep
        });
    }

    fn ensure_globals(&self, doc: &mut LoaderConf) {
        if !doc.contains("prompt") {
            doc.set("prompt", None);
        }
        if !doc.contains("timeout") {
            let timeout = if self.serial {
                SERIAL_TIMEOUT
            } else {
                DEFAULT_TIMEOUT
            };
            doc.set("timeout", Some(&timeout.to_string()));
        }
    }

    fn set_default_label(
        &self,
        doc: &mut LoaderConf,
        kernels: &[WantedKernel],
        chain: &[WantedChain],
        default_device: &str,
    ) {
        let label = if self.graph.root_device().name == default_device {
            kernels[0].label.as_str()
        } else {
            chain
                .iter()
                .find(|c| !c.label.is_empty())
                .map(|c| c.label.as_str())
                .unwrap_or(kernels[0].label.as_str())
        };
        doc.set("default", Some(label));
    }

    fn add_kernel_stanzas(&self, doc: &mut LoaderConf, kernels: &[WantedKernel], args: &str) {
        let root = self.graph.root_device();
        for kernel in kernels {
            doc.delete_stanza(&kernel.label);

            let mut stanza =
                Stanza::new(StanzaKind::Image, &format!("/boot/vmlinuz-{}", kernel.version));
            stanza.set("label", Some(&kernel.label));
            if let Some(initrd) = self.find_initrd(&kernel.version) {
                stanza.set("initrd", Some(&initrd));
            }
            stanza.set("read-only", None);

            // a raw device path goes in its own entry; a UUID/LABEL spec
            // can only be passed on the command line
            let mut args = args.to_string();
            if root.fstab_spec.starts_with('/') {
                stanza.set("root", Some(&root.fstab_spec));
            } else {
                if !args.is_empty() {
                    args.push(' ');
                }
                args.push_str(&format!("root={}", root.fstab_spec));
            }
            if !args.is_empty() {
                stanza.set("append", Some(&args));
            }
            doc.stanzas.push(stanza);
        }
    }

    fn add_chain_stanzas(&self, doc: &mut LoaderConf, chain: &[WantedChain]) {
        for target in chain {
            if target.label.is_empty() {
                continue;
            }
            // an entry carried over from a previous configuration is
            // reused wholesale, keeping its target and any hand-added
            // options; re-appending normalizes its position
            if let Some(pos) = doc
                .stanzas
                .iter()
                .position(|s| s.label() == Some(target.label.as_str()))
            {
                let existing = doc.stanzas.remove(pos);
                doc.stanzas.push(existing);
                continue;
            }
            let path = self
                .graph
                .get(&target.device)
                .map(|d| d.path.clone())
                .unwrap_or_else(|| format!("/dev/{}", target.device));
            let mut stanza = Stanza::new(StanzaKind::Other, &path);
            stanza.set("label", Some(&target.label));
            stanza.set("optional", None);
            doc.stanzas.push(stanza);
        }
    }

    #[context("Writing {config}")]
    fn write(&self, config: &Utf8Path, doc: &LoaderConf, mode: u32) -> Result<()> {
        std::fs::write(config, doc.to_string())?;
        std::fs::set_permissions(
            config.as_std_path(),
            std::fs::Permissions::from_mode(mode),
        )?;
        Ok(())
    }
}

/// Remove alias entries colliding with any label or earlier alias; the
/// explicit label always wins.
fn prune_colliding_aliases(doc: &mut LoaderConf) {
    let mut seen: Vec<String> = doc.labels().iter().map(|l| l.to_string()).collect();
    for stanza in doc.stanzas.iter_mut() {
        let Some(alias) = stanza.get("alias").map(str::to_string) else {
            continue;
        };
        if seen.contains(&alias) {
            debug!("dropping alias {alias}: collides with an existing name");
            stanza.remove("alias");
        } else {
            seen.push(alias);
        }
    }
}

/// Single-key boot selects entries by the first letter of their name; it
/// has to go when two names share one.
fn check_single_key(doc: &mut LoaderConf) {
    if !doc.contains("single-key") {
        return;
    }
    let mut names: Vec<String> = doc.labels().iter().map(|l| l.to_string()).collect();
    names.extend(
        doc.stanzas
            .iter()
            .filter_map(|s| s.get("alias").map(str::to_string)),
    );
    let mut initials: Vec<char> = names.iter().filter_map(|n| n.chars().next()).collect();
    initials.sort_unstable();
    let ambiguous = initials.windows(2).any(|w| w[0] == w[1]);
    if ambiguous {
        warn!("disabling single-key: two entry names share a first letter");
        doc.remove("single-key");
    }
}
