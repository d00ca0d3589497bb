//! Kernel argument builder.
//!
//! Aggregates the kernel command line for newly written boot entries from
//! independent contributors: dracut-style storage setup arguments (with
//! their dependency closure), arguments echoed from the running command
//! line, locale and keyboard tokens, and caller-appended extras.  The
//! rendered string is a pure function of the inputs and re-building from
//! an already-built string is a no-op.

use std::collections::{BTreeMap, BTreeSet};

use crate::kernel_cmdline::{key_eq, Cmdline, Parameter};
use crate::platform::{Platform, Variant};
use crate::storage::StorageGraph;

/// Arguments echoed verbatim from the running command line when present.
const ECHO_ARGS: &[&str] = &[
    "speakup_synth",
    "apic",
    "noapic",
    "apm",
    "ide",
    "noht",
    "acpi",
    "video",
    "pci",
    "nodmraid",
    "nompath",
    "nomodeset",
    "noiswmd",
    "fips",
    "rdloaddriver",
];

/// Early-boot subsystems dracut probes for unless told not to.  When the
/// collected storage arguments carry no positive tag for a subsystem, the
/// matching disable token is emitted so boot does not stall scanning for
/// devices that are not there.
const DRACUT_DISABLE: &[(&str, &str)] = &[
    ("rd_LUKS_UUID", "rd_NO_LUKS"),
    ("rd_LVM_LV", "rd_NO_LVM"),
    ("rd_MD_UUID", "rd_NO_MD"),
    ("rd_DM_UUID", "rd_NO_DM"),
];

/// Accumulates kernel arguments for one boot entry.
#[derive(Debug)]
pub struct KernelArguments<'a> {
    platform: &'a Platform,
    graph: &'a StorageGraph,
    tokens: Vec<String>,
}

impl<'a> KernelArguments<'a> {
    /// An empty argument set for the given platform and storage graph.
    pub fn new(platform: &'a Platform, graph: &'a StorageGraph) -> Self {
        Self {
            platform,
            graph,
            tokens: Vec::new(),
        }
    }

    /// Add a single token, ignoring exact duplicates.
    pub fn add(&mut self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() || self.tokens.contains(&token) {
            return;
        }
        self.tokens.push(token);
    }

    /// Add every token from an iterator.
    pub fn add_all<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for t in tokens {
            self.add(t);
        }
    }

    /// Collect the dracut setup arguments of the named devices and of
    /// everything they are (transitively) built from, then emit the
    /// disable token for each early-boot subsystem no collected argument
    /// activates.
    pub fn collect_device_args(&mut self, required: &[&str]) {
        let mut collected: Vec<String> = Vec::new();
        for name in required {
            for dev in self.graph.devices() {
                if dev.name == *name || self.graph.depends_on(name, &dev.name) {
                    collected.extend(dev.dracut_setup_args.iter().cloned());
                }
            }
        }

        // Only the collected device arguments count here; appended
        // arguments never suppress a disable token.
        for (positive, disable) in DRACUT_DISABLE {
            let active = collected
                .iter()
                .any(|t| key_eq(Parameter::from(t.as_str()).key, positive));
            if !active {
                self.add(*disable);
            }
        }
        self.add_all(collected);
    }

    /// Echo the fixed allow-list of arguments from the running command
    /// line, plus the serial console argument and, on s390, the device
    /// blacklist.  With `fips=1` and a separate /boot, dracut also needs
    /// to be told where the kernel's integrity data lives.
    pub fn echo_boot_args(&mut self, cmdline: &Cmdline<'_>) {
        let mut echo: Vec<&str> = ECHO_ARGS.to_vec();
        if self.platform.variant() == Variant::S390 {
            echo.push("cio_ignore");
        }
        for key in echo {
            if let Some(p) = cmdline.find(key) {
                self.add(p.parameter);
            }
        }

        // the last console= wins, matching the kernel's own behavior
        if let Some(console) = cmdline.iter().filter(|p| p.key == "console").last() {
            self.add(console.parameter);
        }

        if cmdline.value_of("fips") == Some("1") {
            let boot = self.graph.boot_mount_device();
            if boot.name != self.graph.root_device().name {
                self.add(format!("boot={}", boot.fstab_spec));
            }
        }
    }

    /// Render the final argument string: merge `ip=` clauses, order the
    /// tokens deterministically, and join with single spaces.
    pub fn render(&self) -> String {
        let mut tokens = merge_ip(self.tokens.clone());
        tokens.sort_by(|a, b| {
            (order_weight(a), a.as_str()).cmp(&(order_weight(b), b.as_str()))
        });
        tokens.dedup();
        tokens.join(" ")
    }

    /// One-shot build per the engine contract: storage arguments for the
    /// root device, locale and keyboard tokens, allow-listed arguments
    /// from `cmdline`, and caller-appended extras.
    pub fn build(
        platform: &'a Platform,
        graph: &'a StorageGraph,
        cmdline: &Cmdline<'_>,
        locale_args: &[String],
        keyboard: Option<&str>,
        appended: &[String],
    ) -> String {
        let mut args = Self::new(platform, graph);
        // a fips install also needs the device holding /boot assembled
        // early so the kernel's integrity data can be read
        let mut required = vec![graph.root_device().name.as_str()];
        if cmdline.value_of("fips") == Some("1") {
            let boot = graph.boot_mount_device();
            if boot.name != required[0] {
                required.push(boot.name.as_str());
            }
        }
        args.collect_device_args(&required);
        args.add_all(locale_args.iter().cloned());
        if let Some(kbd) = keyboard {
            args.add(kbd);
        }
        args.echo_boot_args(cmdline);
        args.add_all(appended.iter().cloned());
        args.render()
    }
}

/// Collapse `ip=<nic>:<cfg>` clauses (single colon only) into one
/// canonical clause per interface, with the config values of each
/// interface unioned and sorted.
fn merge_ip(tokens: Vec<String>) -> Vec<String> {
    let mut rest = Vec::new();
    let mut by_nic: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for t in tokens {
        if let Some(spec) = t.strip_prefix("ip=") {
            let mut parts = spec.split(':');
            if let (Some(nic), Some(cfg), None) = (parts.next(), parts.next(), parts.next()) {
                by_nic
                    .entry(nic.to_string())
                    .or_default()
                    .extend(cfg.split(',').map(str::to_string));
                continue;
            }
        }
        rest.push(t);
    }
    for (nic, cfgs) in by_nic {
        let cfgs: Vec<String> = cfgs.into_iter().collect();
        rest.push(format!("ip={nic}:{}", cfgs.join(",")));
    }
    rest
}

/// Diagnostic/quiet-boot tokens always render last, in that order.
fn order_weight(token: &str) -> u32 {
    match Parameter::from(token).key {
        "rhgb" => 99,
        "quiet" => 100,
        _ => 50,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::simple_graph;
    use crate::storage::{DeviceKind, StorageDevice, StorageGraph};

    fn x86() -> Platform {
        Platform::new(Variant::X86, false)
    }

    #[test]
    fn test_disable_tokens_without_storage_args() {
        let g = simple_graph();
        let p = x86();
        let mut args = KernelArguments::new(&p, &g);
        args.collect_device_args(&["sda2"]);
        let rendered = args.render();
        for (_, disable) in DRACUT_DISABLE {
            assert!(rendered.contains(disable), "{rendered}");
        }
    }

    #[test]
    fn test_positive_tag_suppresses_disable() {
        let mut devices = simple_graph().devices().to_vec();
        let mut lv = StorageDevice::new("vg-root", DeviceKind::LvmLv);
        lv.parents = vec!["sda2".into()];
        lv.format.mountpoint = Some("/".into());
        lv.dracut_setup_args = vec!["rd_LVM_LV=vg/root".into()];
        devices.push(lv);
        let g = StorageGraph::new(devices, "vg-root").unwrap();

        let p = x86();
        let mut args = KernelArguments::new(&p, &g);
        args.collect_device_args(&["vg-root"]);
        let rendered = args.render();
        assert!(rendered.contains("rd_LVM_LV=vg/root"));
        assert!(!rendered.contains("rd_NO_LVM"));
        assert!(rendered.contains("rd_NO_LUKS"));
    }

    #[test]
    fn test_dependency_closure() {
        // crypt device stacked on a partition; the partition's setup args
        // must be collected when the crypt device is required
        let mut devices = simple_graph().devices().to_vec();
        for d in devices.iter_mut() {
            if d.name == "sda2" {
                d.dracut_setup_args = vec!["rd_MD_UUID=feedface".into()];
            }
        }
        let mut luks = StorageDevice::new("luks-root", DeviceKind::Crypt);
        luks.parents = vec!["sda2".into()];
        luks.format.mountpoint = Some("/".into());
        luks.dracut_setup_args = vec!["rd_LUKS_UUID=luks-cafe".into()];
        devices.push(luks);
        let g = StorageGraph::new(devices, "luks-root").unwrap();

        let p = x86();
        let mut args = KernelArguments::new(&p, &g);
        args.collect_device_args(&["luks-root"]);
        let rendered = args.render();
        assert!(rendered.contains("rd_LUKS_UUID=luks-cafe"));
        assert!(rendered.contains("rd_MD_UUID=feedface"));
        assert!(!rendered.contains("rd_NO_LUKS"));
        assert!(!rendered.contains("rd_NO_MD"));
    }

    #[test]
    fn test_echo_allow_list() {
        let g = simple_graph();
        let p = x86();
        let cmdline =
            Cmdline::from("ro root=/dev/sda2 acpi=off selinux=0 console=tty0 console=ttyS0,115200");
        let mut args = KernelArguments::new(&p, &g);
        args.echo_boot_args(&cmdline);
        let rendered = args.render();
        assert!(rendered.contains("acpi=off"));
        assert!(!rendered.contains("selinux"));
        assert!(!rendered.contains("root=/dev/sda2"));
        // the last console argument wins
        assert!(rendered.contains("console=ttyS0,115200"));
        assert!(!rendered.contains("console=tty0"));
    }

    #[test]
    fn test_cio_ignore_s390_only() {
        let g = simple_graph();
        let cmdline = Cmdline::from("cio_ignore=all,!0.0.0009");
        let s390 = Platform::new(Variant::S390, false);
        let mut args = KernelArguments::new(&s390, &g);
        args.echo_boot_args(&cmdline);
        assert!(args.render().contains("cio_ignore=all,!0.0.0009"));

        let p = x86();
        let mut args = KernelArguments::new(&p, &g);
        args.echo_boot_args(&cmdline);
        assert_eq!(args.render(), "");
    }

    #[test]
    fn test_fips_boot_spec() {
        let g = simple_graph();
        let p = x86();
        let cmdline = Cmdline::from("fips=1");
        let mut args = KernelArguments::new(&p, &g);
        args.echo_boot_args(&cmdline);
        let rendered = args.render();
        assert!(rendered.contains("fips=1"));
        // simple_graph has a separate /boot on sda1
        assert!(rendered.contains("boot=UUID=1111-2222"));
    }

    #[test]
    fn test_ip_merge() {
        let g = simple_graph();
        let p = x86();
        let mut args = KernelArguments::new(&p, &g);
        args.add("ip=eth0:dhcp");
        args.add("ip=eth0:auto6");
        args.add("ip=eth1:dhcp");
        // more than one colon is not a mergeable clause
        args.add("ip=10.0.0.2::10.0.0.1:255.255.255.0");
        let rendered = args.render();
        assert!(rendered.contains("ip=eth0:auto6,dhcp"));
        assert!(rendered.contains("ip=eth1:dhcp"));
        assert!(rendered.contains("ip=10.0.0.2::10.0.0.1:255.255.255.0"));
        assert_eq!(rendered.matches("ip=eth0").count(), 1);
    }

    #[test]
    fn test_render_ordering() {
        let g = simple_graph();
        let p = x86();
        let mut args = KernelArguments::new(&p, &g);
        args.add_all(["quiet", "rhgb", "acpi=off", "zswap.enabled=1"]);
        let rendered = args.render();
        assert_eq!(rendered, "acpi=off zswap.enabled=1 rhgb quiet");
    }

    #[test]
    fn test_build_idempotent() {
        let g = simple_graph();
        let p = x86();
        let cmdline = Cmdline::from("acpi=off nomodeset");
        let locale = vec!["LANG=en_US.UTF-8".to_string()];
        let appended = vec!["rhgb".to_string(), "quiet".to_string(), "ip=eth0:dhcp".to_string()];
        let first = KernelArguments::build(&p, &g, &cmdline, &locale, Some("KEYTABLE=us"), &appended);
        let second = KernelArguments::build(&p, &g, &cmdline, &locale, Some("KEYTABLE=us"), &appended);
        assert_eq!(first, second);
        assert!(first.ends_with("rhgb quiet"));

        // re-rendering an already-rendered string is a no-op
        let mut again = KernelArguments::new(&p, &g);
        again.add_all(first.split_ascii_whitespace());
        assert_eq!(again.render(), first);
    }
}
