//! Architecture-specific boot policy.
//!
//! Each supported architecture variant owns its allowed boot filesystem
//! and disklabel types, boot partition size bounds, and the rules for
//! locating and validating the boot device.  The variant is selected once
//! at process start and is immutable afterwards.
//!
//! The policy is a closed enum plus a per-variant capability table;
//! the variant-specific checks delegate explicitly to a shared base
//! rule set.

use anyhow::Result;
use camino::Utf8Path;

use crate::storage::{DeviceKind, StorageDevice, StorageGraph};
use crate::Error;

/// A closed set of supported architecture variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Variant {
    /// Baseline rules shared by all variants
    Generic,
    /// Generic EFI firmware boot
    Efi,
    /// DEC Alpha
    Alpha,
    /// Itanium
    Ia64,
    /// PowerPC, machine type unknown
    Ppc,
    /// IBM iSeries/pSeries PowerPC
    PpcIseries,
    /// New World Apple PowerMac
    PpcNewWorld,
    /// Sony PS3
    PpcPs3,
    /// IBM mainframe
    S390,
    /// Sun SPARC
    Sparc,
    /// x86 / x86_64
    X86,
}

/// The constant capability row of a variant.
#[derive(Debug)]
struct VariantCaps {
    /// Allowed boot filesystem types; first is the default
    boot_fs_types: &'static [&'static str],
    /// Allowed disklabel types; first is the default
    disklabel_types: &'static [&'static str],
    /// Minimum boot partition size in MiB (0 = unbounded)
    min_boot_mib: f64,
    /// Maximum boot partition size in MiB (0 = unbounded)
    max_boot_mib: f64,
    supports_lvm_boot: bool,
    supports_md_raid_boot: bool,
    /// Whether the variant boots through EFI-style firmware
    is_efi: bool,
    /// Whether foreign-OS dual boot entries are offered
    dual_boot: bool,
}

const EXT_FS: &[&str] = &["ext4", "ext3", "ext2"];

static GENERIC_CAPS: VariantCaps = GENERIC_CAPS_TEMPLATE;

static EFI_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    disklabel_types: &["gpt"],
    min_boot_mib: 50.0,
    max_boot_mib: 0.0,
    supports_lvm_boot: false,
    supports_md_raid_boot: false,
    is_efi: true,
    dual_boot: false,
};

static ALPHA_CAPS: VariantCaps = VariantCaps {
    disklabel_types: &["bsd"],
    ..GENERIC_CAPS_TEMPLATE
};

static PPC_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    supports_md_raid_boot: true,
    ..GENERIC_CAPS_TEMPLATE
};

static PPC_ISERIES_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    supports_md_raid_boot: true,
    min_boot_mib: 4.0,
    max_boot_mib: 10.0,
    ..GENERIC_CAPS_TEMPLATE
};

static PPC_NEW_WORLD_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    supports_md_raid_boot: true,
    disklabel_types: &["mac"],
    min_boot_mib: 800.0 / 1024.0,
    max_boot_mib: 1.0,
    ..GENERIC_CAPS_TEMPLATE
};

static PPC_PS3_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    supports_md_raid_boot: true,
    ..GENERIC_CAPS_TEMPLATE
};

static S390_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    supports_lvm_boot: true,
    ..GENERIC_CAPS_TEMPLATE
};

static SPARC_CAPS: VariantCaps = VariantCaps {
    disklabel_types: &["sun"],
    ..GENERIC_CAPS_TEMPLATE
};

static X86_BIOS_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    disklabel_types: &["msdos", "gpt"],
    supports_md_raid_boot: true,
    dual_boot: true,
    ..GENERIC_CAPS_TEMPLATE
};

static X86_EFI_CAPS: VariantCaps = VariantCaps {
    boot_fs_types: EXT_FS,
    disklabel_types: &["gpt"],
    supports_md_raid_boot: true,
    is_efi: true,
    dual_boot: true,
    ..GENERIC_CAPS_TEMPLATE
};

// Struct update syntax needs a const template, not a static.
const GENERIC_CAPS_TEMPLATE: VariantCaps = VariantCaps {
    boot_fs_types: &["ext3"],
    disklabel_types: &["msdos"],
    min_boot_mib: 50.0,
    max_boot_mib: 0.0,
    supports_lvm_boot: false,
    supports_md_raid_boot: false,
    is_efi: false,
    dual_boot: false,
};

/// A partition the architecture requires, as input to automatic
/// partition layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PartSpec {
    /// Mount point, when the partition is mounted
    pub mountpoint: Option<String>,
    /// Filesystem or format type
    pub fstype: String,
    /// Requested size in MiB
    pub size_mib: f64,
    /// Upper growth bound in MiB, when growable
    pub max_size_mib: Option<f64>,
    /// Whether the partition may grow beyond the requested size
    pub grow: bool,
    /// Layout ordering weight; higher is placed first
    pub weight: i32,
}

/// The selected platform policy.
#[derive(Debug)]
pub struct Platform {
    variant: Variant,
    caps: &'static VariantCaps,
}

impl Platform {
    /// Select the policy for a variant.  For x86 the capability row
    /// depends on whether the machine booted through EFI firmware.
    pub fn new(variant: Variant, efi_firmware: bool) -> Self {
        let caps = match variant {
            Variant::Generic => &GENERIC_CAPS,
            Variant::Efi | Variant::Ia64 => &EFI_CAPS,
            Variant::Alpha => &ALPHA_CAPS,
            Variant::Ppc => &PPC_CAPS,
            Variant::PpcIseries => &PPC_ISERIES_CAPS,
            Variant::PpcNewWorld => &PPC_NEW_WORLD_CAPS,
            Variant::PpcPs3 => &PPC_PS3_CAPS,
            Variant::S390 => &S390_CAPS,
            Variant::Sparc => &SPARC_CAPS,
            Variant::X86 => {
                if efi_firmware {
                    &X86_EFI_CAPS
                } else {
                    &X86_BIOS_CAPS
                }
            }
        };
        Self { variant, caps }
    }

    /// Check the architecture of the running system and select the
    /// matching variant.  Fails with [`Error::UnsupportedPlatform`] if
    /// the architecture could not be mapped.
    pub fn detect() -> Result<Self, Error> {
        let uts = rustix::system::uname();
        let machine = uts.machine().to_string_lossy().into_owned();
        let efi_firmware = Utf8Path::new("/sys/firmware/efi").exists();
        let variant = match machine.as_str() {
            "x86_64" | "i386" | "i486" | "i586" | "i686" => Variant::X86,
            "ia64" => Variant::Ia64,
            "alpha" => Variant::Alpha,
            "s390" | "s390x" => Variant::S390,
            "sparc" | "sparc64" => Variant::Sparc,
            "ppc" | "ppc64" | "ppc64le" => {
                let cpuinfo = std::fs::read_to_string("/proc/cpuinfo")
                    .map_err(|e| Error::UnsupportedPlatform(format!("reading cpuinfo: {e}")))?;
                ppc_variant(&cpuinfo)
            }
            other => return Err(Error::UnsupportedPlatform(other.to_string())),
        };
        Ok(Self::new(variant, efi_firmware))
    }

    /// The selected variant.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// All valid filesystem types for the boot partition.
    pub fn boot_fs_types(&self) -> &'static [&'static str] {
        self.caps.boot_fs_types
    }

    /// The default filesystem type for the boot partition.
    pub fn default_boot_fs_type(&self) -> &'static str {
        self.caps.boot_fs_types[0]
    }

    /// All valid disklabel types for this architecture.
    pub fn disklabel_types(&self) -> &'static [&'static str] {
        self.caps.disklabel_types
    }

    /// The default disklabel type for this architecture.
    pub fn default_disklabel_type(&self) -> &'static str {
        self.caps.disklabel_types[0]
    }

    /// The disklabel type a specific device type requires, overriding
    /// the per-architecture default.
    pub fn required_disklabel_type(&self, device_type: &str) -> Option<&'static str> {
        match self.variant {
            Variant::S390 if device_type == "dasd" => Some("dasd"),
            _ => None,
        }
    }

    /// Whether the variant boots through EFI-style firmware.
    pub fn is_efi(&self) -> bool {
        self.caps.is_efi
    }

    /// Does the platform support /boot on an LVM logical volume?
    pub fn supports_lvm_boot(&self) -> bool {
        self.caps.supports_lvm_boot
    }

    /// Does the platform support /boot on MD RAID?
    pub fn supports_md_raid_boot(&self) -> bool {
        self.caps.supports_md_raid_boot
    }

    /// Whether foreign-OS dual boot menu entries are offered.
    pub fn supports_dual_boot(&self) -> bool {
        self.caps.dual_boot
    }

    /// Minimum boot partition size in MiB (0 = unbounded).
    pub fn min_boot_part_size(&self) -> f64 {
        self.caps.min_boot_mib
    }

    /// Maximum boot partition size in MiB (0 = unbounded).
    pub fn max_boot_part_size(&self) -> f64 {
        self.caps.max_boot_mib
    }

    /// Is the given size (in MiB) acceptable for a boot device?
    pub fn valid_boot_part_size(&self, size_mib: f64) -> bool {
        (self.caps.min_boot_mib == 0.0 || size_mib >= self.caps.min_boot_mib)
            && (self.caps.max_boot_mib == 0.0 || size_mib <= self.caps.max_boot_mib)
    }

    /// Given an fstype or a mount point, return the base sorting weight
    /// used to order partition requests so that bootable partitions are
    /// placed where they need to be.
    pub fn weight(&self, fstype: Option<&str>, mountpoint: Option<&str>) -> i32 {
        let critical = match self.variant {
            Variant::Efi | Variant::Ia64 | Variant::X86 => {
                fstype == Some("efi") || mountpoint == Some("/boot/efi")
            }
            Variant::PpcIseries => fstype == Some("prepboot"),
            Variant::PpcNewWorld | Variant::PpcPs3 => fstype == Some("appleboot"),
            _ => false,
        };
        if critical {
            5000
        } else if mountpoint == Some("/boot") {
            // S390 wants /boot placed ahead of everything else
            if self.variant == Variant::S390 {
                5000
            } else {
                2000
            }
        } else {
            0
        }
    }

    /// Locate the device eligible to hold the boot loader, or `None` if
    /// no device qualifies.
    pub fn boot_device<'a>(&self, graph: &'a StorageGraph) -> Option<&'a StorageDevice> {
        match self.variant {
            _ if self.caps.is_efi => self.efi_system_partition(graph),
            Variant::PpcIseries => graph
                .partitions()
                .find(|p| p.format.fstype.as_deref() == Some("prepboot")),
            Variant::PpcNewWorld => graph.partitions().find(|p| {
                p.format.fstype.as_deref() == Some("appleboot")
                    && self.valid_boot_part_size(p.size_mib)
            }),
            _ => Some(graph.boot_mount_device()),
        }
    }

    /// The EFI system partition on the highest-priority drive, subject
    /// to the variant's size bounds.
    fn efi_system_partition<'a>(&self, graph: &'a StorageGraph) -> Option<&'a StorageDevice> {
        let drive = graph.drives().first()?;
        graph.partitions().find(|p| {
            p.disk.as_deref() == Some(drive.as_str())
                && p.format.fstype.as_deref() == Some("efi")
                && self.valid_boot_part_size(p.size_mib)
        })
    }

    /// The error text reported when no boot device exists.
    fn missing_boot_message(&self) -> String {
        if self.caps.is_efi {
            "You have not created a /boot/efi partition.".to_string()
        } else {
            "You have not created a bootable partition.".to_string()
        }
    }

    /// Rules shared by every variant.
    fn base_check(&self, graph: &StorageGraph, device: &StorageDevice) -> Vec<String> {
        let mut errors = Vec::new();

        // most arches can't have boot on a logical volume
        if device.kind == DeviceKind::LvmLv && !self.caps.supports_lvm_boot {
            errors.push("Bootable partitions cannot be on a logical volume.".to_string());
        }

        // most arches can't have boot on RAID
        if device.kind == DeviceKind::MdArray {
            if !self.caps.supports_md_raid_boot {
                errors.push("Bootable partitions cannot be on a RAID device.".to_string());
            } else if device.raid_level != Some(1) {
                errors.push("Bootable partitions can only be on RAID1 devices.".to_string());
            }
        }

        // Make sure /boot is on a supported FS type.  This prevents crazy
        // things like boot on vfat.
        let fstype = device.format.fstype.as_deref().unwrap_or("unknown");
        if !device.format.bootable()
            || (device.format.mountpoint.as_deref() == Some("/boot")
                && !self.caps.boot_fs_types.contains(&fstype))
        {
            errors.push(format!(
                "Bootable partitions cannot be on an {fstype} filesystem."
            ));
        }

        // Encrypted boot, either directly or anywhere below us.
        let encrypted = device.kind == DeviceKind::Crypt
            || graph
                .devices()
                .iter()
                .filter(|d| d.kind == DeviceKind::Crypt)
                .any(|d| graph.depends_on(&device.name, &d.name));
        if encrypted {
            errors.push("Bootable partitions cannot be on an encrypted block device".to_string());
        }

        errors
    }

    /// Validate a boot device candidate.  Pure; returns a list of
    /// user-facing problems, empty when the request is acceptable.
    pub fn check_boot_request(
        &self,
        graph: &StorageGraph,
        device: Option<&StorageDevice>,
    ) -> Vec<String> {
        let Some(device) = device else {
            return vec![self.missing_boot_message()];
        };

        let mut errors = self.base_check(graph, device);
        match self.variant {
            _ if self.caps.is_efi => errors.extend(self.efi_check(graph, device)),
            Variant::X86 => errors.extend(self.disklabel_check(graph, device, true)),
            Variant::Alpha => errors.extend(self.disklabel_check(graph, device, false)),
            Variant::Ppc => errors.extend(self.ppc_check(device)),
            Variant::PpcIseries => {
                errors.extend(self.ppc_check(device));
                errors.extend(self.iseries_check(graph, device));
            }
            Variant::PpcNewWorld | Variant::PpcPs3 => {
                errors.extend(self.ppc_check(device));
                errors.extend(self.disklabel_check(graph, device, false));
                if self.variant == Variant::PpcNewWorld {
                    errors.extend(self.recheck_boot_mount(graph, device));
                }
            }
            _ => {}
        }
        errors
    }

    /// EFI-specific validation: the firmware boot partition must carry
    /// the EFI format, the kernel-holding device must independently pass
    /// the base rules, and candidate partitions must sit on a suitable
    /// disklabel.
    fn efi_check(&self, graph: &StorageGraph, device: &StorageDevice) -> Vec<String> {
        let mut errors = Vec::new();

        if device.format.mountpoint.as_deref() == Some("/boot/efi") {
            if device.format.fstype.as_deref() != Some("efi") {
                errors.push("/boot/efi is not EFI.".to_string());
            }

            // The kernel still loads from /boot (or /); that device has
            // to be independently acceptable.
            errors.extend(self.base_check(graph, graph.boot_mount_device()));
        }

        errors.extend(self.disklabel_check(graph, device, true));
        errors
    }

    /// Check the disklabel of the disk(s) under a candidate.  With
    /// `allow_gpt`, GPT is accepted even when it is not the variant
    /// default (the firmware-universal fallback); the inverse is never
    /// allowed.
    fn disklabel_check(
        &self,
        graph: &StorageGraph,
        device: &StorageDevice,
        allow_gpt: bool,
    ) -> Vec<String> {
        // Don't try to check the disklabel on lv's etc.
        let partitions: Vec<&StorageDevice> = match device.kind {
            DeviceKind::Partition => vec![device],
            DeviceKind::MdArray => device
                .parents
                .iter()
                .filter_map(|p| graph.get(p))
                .filter(|d| d.kind == DeviceKind::Partition)
                .collect(),
            _ => Vec::new(),
        };

        let mut errors = Vec::new();
        for p in partitions {
            let Some(label) = p.disklabel.as_deref() else {
                continue;
            };
            let ok = if allow_gpt {
                label == self.default_disklabel_type() || label == "gpt"
            } else {
                self.caps.disklabel_types.contains(&label)
            };
            if !ok {
                let disk = p.disk.as_deref().unwrap_or(&p.name);
                errors.push(format!(
                    "{} must have a {} disk label.",
                    disk,
                    self.default_disklabel_type().to_uppercase()
                ));
            }
        }
        errors
    }

    /// The boot loader cannot find /boot on a logical partition.
    fn ppc_check(&self, device: &StorageDevice) -> Vec<String> {
        if device.kind == DeviceKind::Partition && device.is_logical {
            vec!["The boot partition must be a primary partition.".to_string()]
        } else {
            Vec::new()
        }
    }

    /// PReP boot partitions must live at the very start of the disk, and
    /// whatever holds /boot must also satisfy the base rules.
    fn iseries_check(&self, graph: &StorageGraph, device: &StorageDevice) -> Vec<String> {
        let mut errors = Vec::new();
        if device.kind != DeviceKind::Partition {
            return errors;
        }

        if device.end_mib().is_some_and(|end| end > 4.0) {
            errors
                .push("The boot partition must be within the first 4MB of the disk.".to_string());
        }

        errors.extend(self.recheck_boot_mount(graph, device));
        errors
    }

    /// The special boot partition is only half of the story; the device
    /// mounted at /boot (or /) must also pass validation.
    fn recheck_boot_mount(&self, graph: &StorageGraph, device: &StorageDevice) -> Vec<String> {
        let is_boot_device = self
            .boot_device(graph)
            .is_some_and(|b| b.name == device.name);
        if !is_boot_device {
            return Vec::new();
        }
        let boot_mount = graph.boot_mount_device();
        if boot_mount.name == device.name {
            return Vec::new();
        }
        self.base_check(graph, boot_mount)
    }

    /// The minimum partition set this architecture requires.
    pub fn default_partitioning(&self) -> Vec<PartSpec> {
        let mut ret = vec![PartSpec {
            mountpoint: Some("/boot".to_string()),
            fstype: self.default_boot_fs_type().to_string(),
            size_mib: 500.0,
            max_size_mib: None,
            grow: false,
            weight: self.weight(None, Some("/boot")),
        }];

        match self.variant {
            _ if self.caps.is_efi => ret.push(PartSpec {
                mountpoint: Some("/boot/efi".to_string()),
                fstype: "efi".to_string(),
                size_mib: self.caps.min_boot_mib,
                max_size_mib: Some(200.0),
                grow: true,
                weight: self.weight(Some("efi"), None),
            }),
            Variant::PpcIseries => ret.push(PartSpec {
                mountpoint: None,
                fstype: "prepboot".to_string(),
                size_mib: 4.0,
                max_size_mib: None,
                grow: false,
                weight: self.weight(Some("prepboot"), None),
            }),
            Variant::PpcNewWorld | Variant::PpcPs3 => ret.push(PartSpec {
                mountpoint: None,
                fstype: "appleboot".to_string(),
                size_mib: 1.0,
                max_size_mib: Some(1.0),
                grow: false,
                weight: self.weight(Some("appleboot"), None),
            }),
            _ => {}
        }

        ret
    }
}

/// Map `/proc/cpuinfo` contents to a PowerPC machine variant.
fn ppc_variant(cpuinfo: &str) -> Variant {
    let field = |key: &str| -> Option<&str> {
        cpuinfo.lines().find_map(|l| {
            let (k, v) = l.split_once(':')?;
            (k.trim() == key).then(|| v.trim())
        })
    };

    if field("platform").is_some_and(|p| p.contains("PS3")) {
        return Variant::PpcPs3;
    }
    if field("platform").is_some_and(|p| p.contains("pSeries") || p.contains("iSeries")) {
        return Variant::PpcIseries;
    }
    if field("machine").is_some_and(|m| m.starts_with("PowerMac") || m.starts_with("PowerBook"))
        && field("pmac-generation").is_some_and(|g| g == "NewWorld")
    {
        return Variant::PpcNewWorld;
    }
    Variant::Ppc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testutil::{efi_graph, simple_graph};
    use crate::storage::{DeviceFormat, StorageGraph};

    fn all_variants() -> Vec<Platform> {
        [
            Variant::Generic,
            Variant::Efi,
            Variant::Alpha,
            Variant::Ia64,
            Variant::Ppc,
            Variant::PpcIseries,
            Variant::PpcNewWorld,
            Variant::PpcPs3,
            Variant::S390,
            Variant::Sparc,
            Variant::X86,
        ]
        .into_iter()
        .map(|v| Platform::new(v, false))
        .collect()
    }

    #[test]
    fn test_boot_fs_types_nonempty() {
        for p in all_variants() {
            assert!(!p.boot_fs_types().is_empty(), "{:?}", p.variant());
            assert_eq!(p.default_boot_fs_type(), p.boot_fs_types()[0]);
            assert!(!p.disklabel_types().is_empty(), "{:?}", p.variant());
        }
    }

    #[test]
    fn test_default_partitioning_has_boot() {
        for p in all_variants() {
            let specs = p.default_partitioning();
            assert!(!specs.is_empty(), "{:?}", p.variant());
            assert!(
                specs
                    .iter()
                    .any(|s| s.mountpoint.as_deref() == Some("/boot")),
                "{:?}",
                p.variant()
            );
        }
        // plus the x86-efi row, which all_variants doesn't cover
        let p = Platform::new(Variant::X86, true);
        assert!(p
            .default_partitioning()
            .iter()
            .any(|s| s.fstype == "efi" && s.grow));
    }

    #[test]
    fn test_check_null_device() {
        let g = simple_graph();
        for p in all_variants() {
            let errors = p.check_boot_request(&g, None);
            assert_eq!(errors.len(), 1, "{:?}", p.variant());
        }
        // firmware-boot variants report the firmware-specific text
        let p = Platform::new(Variant::Efi, true);
        assert_eq!(
            p.check_boot_request(&g, None),
            vec!["You have not created a /boot/efi partition.".to_string()]
        );
        let p = Platform::new(Variant::Generic, false);
        assert_eq!(
            p.check_boot_request(&g, None),
            vec!["You have not created a bootable partition.".to_string()]
        );
    }

    #[test]
    fn test_generic_boot_device() {
        let g = simple_graph();
        let p = Platform::new(Variant::X86, false);
        assert_eq!(p.boot_device(&g).unwrap().name, "sda1");
        let errors = p.check_boot_request(&g, p.boot_device(&g));
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_efi_boot_device() {
        let g = efi_graph();
        let p = Platform::new(Variant::X86, true);
        let esp = p.boot_device(&g).unwrap();
        assert_eq!(esp.name, "vda1");
        assert_eq!(p.check_boot_request(&g, Some(esp)), Vec::<String>::new());

        // no ESP at all: the selector returns None and validation reports
        // the firmware-specific message
        let g = simple_graph();
        assert!(p.boot_device(&g).is_none());
        assert_eq!(
            p.check_boot_request(&g, None),
            vec!["You have not created a /boot/efi partition.".to_string()]
        );
    }

    #[test]
    fn test_efi_boot_device_multipath() {
        // sda + sdb -> mpatha (gpt) -> ESP mpatha1 + root mpatha2
        let sda = StorageDevice::new("sda", DeviceKind::Disk);
        let sdb = StorageDevice::new("sdb", DeviceKind::Disk);
        let mut mpath = StorageDevice::new("mpatha", DeviceKind::Multipath);
        mpath.disklabel = Some("gpt".into());
        mpath.parents = vec!["sda".into(), "sdb".into()];
        let mut esp = StorageDevice::new("mpatha1", DeviceKind::Partition);
        esp.disk = Some("mpatha".into());
        esp.disklabel = Some("gpt".into());
        esp.parents = vec!["mpatha".into()];
        esp.size_mib = 200.0;
        esp.format = DeviceFormat {
            fstype: Some("efi".into()),
            mountpoint: Some("/boot/efi".into()),
        };
        let mut root = StorageDevice::new("mpatha2", DeviceKind::Partition);
        root.disk = Some("mpatha".into());
        root.disklabel = Some("gpt".into());
        root.parents = vec!["mpatha".into()];
        root.size_mib = 20000.0;
        root.format = DeviceFormat {
            fstype: Some("ext4".into()),
            mountpoint: Some("/".into()),
        };
        let g = StorageGraph::new(vec![sda, sdb, mpath, esp, root], "mpatha2").unwrap();

        // the aggregate is the boot drive, so the ESP on it qualifies
        assert_eq!(g.drives(), &["mpatha".to_string()]);
        let p = Platform::new(Variant::X86, true);
        let esp = p.boot_device(&g).unwrap();
        assert_eq!(esp.name, "mpatha1");
        assert_eq!(p.check_boot_request(&g, Some(esp)), Vec::<String>::new());
    }

    #[test]
    fn test_efi_rejects_msdos_disklabel() {
        let mut g = efi_graph();
        // rewrite the ESP's disklabel to msdos
        let mut devices = g.devices().to_vec();
        for d in devices.iter_mut() {
            if d.name == "vda1" {
                d.disklabel = Some("msdos".into());
            }
        }
        g = StorageGraph::new(devices, "vda2").unwrap();
        let p = Platform::new(Variant::Efi, true);
        let esp = g.get("vda1").unwrap();
        let errors = p.check_boot_request(&g, Some(esp));
        assert!(
            errors.iter().any(|e| e.contains("GPT disk label")),
            "{errors:?}"
        );
    }

    #[test]
    fn test_x86_bios_allows_gpt() {
        let g = efi_graph();
        let p = Platform::new(Variant::X86, false);
        // /boot falls back to root here, which sits on a gpt disk
        let boot = p.boot_device(&g).unwrap();
        assert_eq!(boot.name, "vda2");
        assert_eq!(p.check_boot_request(&g, Some(boot)), Vec::<String>::new());
    }

    #[test]
    fn test_lvm_and_raid_rules() {
        let g = simple_graph();
        let mut lv = crate::storage::StorageDevice::new("vg-lv0", crate::storage::DeviceKind::LvmLv);
        lv.format = DeviceFormat {
            fstype: Some("ext4".into()),
            mountpoint: Some("/boot".into()),
        };
        let generic = Platform::new(Variant::Generic, false);
        let errors = generic.check_boot_request(&g, Some(&lv));
        assert!(errors
            .iter()
            .any(|e| e.contains("cannot be on a logical volume")));
        // s390 allows LVM boot
        let s390 = Platform::new(Variant::S390, false);
        let errors = s390.check_boot_request(&g, Some(&lv));
        assert!(!errors
            .iter()
            .any(|e| e.contains("cannot be on a logical volume")));

        let mut md = crate::storage::StorageDevice::new("md0", crate::storage::DeviceKind::MdArray);
        md.raid_level = Some(5);
        md.format = DeviceFormat {
            fstype: Some("ext4".into()),
            mountpoint: Some("/boot".into()),
        };
        let errors = generic.check_boot_request(&g, Some(&md));
        assert!(errors.iter().any(|e| e.contains("RAID device")));
        // x86 allows RAID boot, but only level 1
        let x86 = Platform::new(Variant::X86, false);
        let errors = x86.check_boot_request(&g, Some(&md));
        assert!(errors.iter().any(|e| e.contains("RAID1")));
        md.raid_level = Some(1);
        let errors = x86.check_boot_request(&g, Some(&md));
        assert!(!errors.iter().any(|e| e.contains("RAID")));
    }

    #[test]
    fn test_bad_boot_filesystem() {
        let g = simple_graph();
        let mut dev = crate::storage::StorageDevice::new("sdb1", crate::storage::DeviceKind::Partition);
        dev.format = DeviceFormat {
            fstype: Some("vfat".into()),
            mountpoint: Some("/boot".into()),
        };
        let p = Platform::new(Variant::X86, false);
        let errors = p.check_boot_request(&g, Some(&dev));
        assert!(
            errors
                .iter()
                .any(|e| e.contains("cannot be on an vfat filesystem")),
            "{errors:?}"
        );
    }

    #[test]
    fn test_encrypted_boot_rejected() {
        // crypt device stacked on the boot partition
        let mut g = simple_graph().devices().to_vec();
        let mut luks = crate::storage::StorageDevice::new("luks-boot", crate::storage::DeviceKind::Crypt);
        luks.parents = vec!["sda1".into()];
        g.push(luks);
        let g = StorageGraph::new(g, "sda2").unwrap();

        let p = Platform::new(Variant::X86, false);
        let luks = g.get("luks-boot").unwrap();
        let errors = p.check_boot_request(&g, Some(luks));
        assert!(errors
            .iter()
            .any(|e| e.contains("encrypted block device")));

        // and a device an encrypted device sits under
        let boot = g.get("sda1").unwrap();
        let errors = p.check_boot_request(&g, Some(boot));
        // sda1 does not depend on the crypt device, so it is fine
        assert!(!errors.iter().any(|e| e.contains("encrypted")));
    }

    #[test]
    fn test_iseries_prep_placement() {
        let mut sda = crate::storage::StorageDevice::new("sda", crate::storage::DeviceKind::Disk);
        sda.disklabel = Some("msdos".into());
        let mut prep = crate::storage::StorageDevice::new("sda1", crate::storage::DeviceKind::Partition);
        prep.disk = Some("sda".into());
        prep.disklabel = Some("msdos".into());
        prep.parents = vec!["sda".into()];
        prep.format.fstype = Some("prepboot".into());
        prep.size_mib = 4.0;
        prep.start_sector = Some(2048); // starts at 1 MiB, ends at 5 MiB
        let mut root = crate::storage::StorageDevice::new("sda2", crate::storage::DeviceKind::Partition);
        root.disk = Some("sda".into());
        root.parents = vec!["sda".into()];
        root.format = DeviceFormat {
            fstype: Some("ext3".into()),
            mountpoint: Some("/".into()),
        };
        let g = StorageGraph::new(vec![sda, prep, root], "sda2").unwrap();

        let p = Platform::new(Variant::PpcIseries, false);
        let boot = p.boot_device(&g).unwrap();
        assert_eq!(boot.name, "sda1");
        let errors = p.check_boot_request(&g, Some(boot));
        assert!(
            errors.iter().any(|e| e.contains("first 4MB")),
            "{errors:?}"
        );

        // move it to the very start of the disk
        let mut devices = g.devices().to_vec();
        for d in devices.iter_mut() {
            if d.name == "sda1" {
                d.start_sector = Some(0);
            }
        }
        let g = StorageGraph::new(devices, "sda2").unwrap();
        let errors = p.check_boot_request(&g, g.get("sda1"));
        assert_eq!(errors, Vec::<String>::new());
    }

    #[test]
    fn test_newworld_boot_device_size_bounds() {
        let mut sda = crate::storage::StorageDevice::new("sda", crate::storage::DeviceKind::Disk);
        sda.disklabel = Some("mac".into());
        let mut big = crate::storage::StorageDevice::new("sda2", crate::storage::DeviceKind::Partition);
        big.disk = Some("sda".into());
        big.disklabel = Some("mac".into());
        big.parents = vec!["sda".into()];
        big.format.fstype = Some("appleboot".into());
        big.size_mib = 10.0; // too big
        let mut small = crate::storage::StorageDevice::new("sda3", crate::storage::DeviceKind::Partition);
        small.disk = Some("sda".into());
        small.disklabel = Some("mac".into());
        small.parents = vec!["sda".into()];
        small.format.fstype = Some("appleboot".into());
        small.size_mib = 1.0;
        let mut root = crate::storage::StorageDevice::new("sda4", crate::storage::DeviceKind::Partition);
        root.disk = Some("sda".into());
        root.disklabel = Some("mac".into());
        root.parents = vec!["sda".into()];
        root.format = DeviceFormat {
            fstype: Some("ext3".into()),
            mountpoint: Some("/".into()),
        };
        let g = StorageGraph::new(vec![sda, big, small, root], "sda4").unwrap();

        let p = Platform::new(Variant::PpcNewWorld, false);
        // the oversized bootstrap partition is skipped
        assert_eq!(p.boot_device(&g).unwrap().name, "sda3");
    }

    #[test]
    fn test_ppc_logical_partition() {
        let g = simple_graph();
        let mut dev = crate::storage::StorageDevice::new("sdb5", crate::storage::DeviceKind::Partition);
        dev.is_logical = true;
        dev.format.fstype = Some("ext3".into());
        let p = Platform::new(Variant::Ppc, false);
        let errors = p.check_boot_request(&g, Some(&dev));
        assert!(errors.iter().any(|e| e.contains("primary partition")));
    }

    #[test]
    fn test_weights() {
        let efi = Platform::new(Variant::Efi, true);
        assert_eq!(efi.weight(Some("efi"), None), 5000);
        assert_eq!(efi.weight(None, Some("/boot/efi")), 5000);
        assert_eq!(efi.weight(None, Some("/boot")), 2000);
        assert_eq!(efi.weight(None, Some("/home")), 0);

        let iseries = Platform::new(Variant::PpcIseries, false);
        assert_eq!(iseries.weight(Some("prepboot"), None), 5000);
        let nw = Platform::new(Variant::PpcNewWorld, false);
        assert_eq!(nw.weight(Some("appleboot"), None), 5000);
        let s390 = Platform::new(Variant::S390, false);
        assert_eq!(s390.weight(None, Some("/boot")), 5000);
        let generic = Platform::new(Variant::Generic, false);
        assert_eq!(generic.weight(None, Some("/boot")), 2000);
    }

    #[test]
    fn test_required_disklabel() {
        let s390 = Platform::new(Variant::S390, false);
        assert_eq!(s390.required_disklabel_type("dasd"), Some("dasd"));
        assert_eq!(s390.required_disklabel_type("scsi"), None);
        let x86 = Platform::new(Variant::X86, false);
        assert_eq!(x86.required_disklabel_type("dasd"), None);
    }

    #[test]
    fn test_valid_boot_part_size() {
        let iseries = Platform::new(Variant::PpcIseries, false);
        assert!(iseries.valid_boot_part_size(4.0));
        assert!(iseries.valid_boot_part_size(10.0));
        assert!(!iseries.valid_boot_part_size(11.0));
        assert!(!iseries.valid_boot_part_size(1.0));
        // unbounded max
        let x86 = Platform::new(Variant::X86, false);
        assert!(x86.valid_boot_part_size(100000.0));
    }

    #[test]
    fn test_ppc_variant_from_cpuinfo() {
        let ps3 = "platform\t: PS3\nmachine\t\t: PS3\n";
        assert_eq!(ppc_variant(ps3), Variant::PpcPs3);
        let pseries = "platform\t: pSeries\nmachine\t\t: CHRP IBM,9117-570\n";
        assert_eq!(ppc_variant(pseries), Variant::PpcIseries);
        let pmac = "machine\t\t: PowerMac3,6\npmac-generation\t: NewWorld\n";
        assert_eq!(ppc_variant(pmac), Variant::PpcNewWorld);
        assert_eq!(ppc_variant("machine\t\t: something else\n"), Variant::Ppc);
    }
}
