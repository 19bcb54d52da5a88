/*
* Guest Config Inspector
* ----------------------
* @project: cluster-lifecycle-manager
*
* Takes the flat key/value soup a hypervisor calls a "guest config" and pulls
* out the few facts a migration actually cares about:
*
*   scsi0: local-lvm:vm-100-disk-0,size=50G     -> local disk, 50 GB
*   ide2:  local:iso/debian.iso,media=cdrom     -> removable media, local-only
*   boot:  order=scsi0;ide2;net0                -> every device must exist
*
* Rules of the house: pure, total, no surprises. Garbage in means "nothing
* found", never a panic and never an error.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage prefixes that only ever exist on a single node.
pub const LOCAL_STORAGE_PREFIXES: [&str; 3] = ["local:", "local-lvm:", "local-zfs:"];

const DISK_SLOT_PREFIXES: [&str; 5] = ["scsi", "sata", "virtio", "ide", "mp"];
const MEDIA_SLOT_PREFIXES: [&str; 3] = ["ide", "sata", "scsi"];
const SHARED_OFF_MARKER: &str = "shared=0";
const CDROM_MARKER: &str = "media=cdrom";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovableMedia {
    /// Config key of the slot, e.g. `ide2`.
    pub device: String,
    /// Media reference, e.g. `local:iso/debian.iso`.
    pub media: String,
    pub local_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFinding {
    pub has_local_disks: bool,
    pub local_disks: Vec<String>,
    pub removable_media: Vec<RemovableMedia>,
    pub boot_defects: Vec<String>,
    pub total_disk_gb: f64,
}

pub fn inspect(config: &HashMap<String, String>) -> ConfigFinding {
    // sorted keys so the finding doesn't depend on hash order
    let mut keys: Vec<&String> = config.keys().collect();
    keys.sort();

    let mut finding = ConfigFinding::default();

    for key in keys {
        let value = &config[key];

        if is_slot(key, &MEDIA_SLOT_PREFIXES) && value.contains(CDROM_MARKER) {
            if let Some(media) = removable_media(key, value) {
                finding.removable_media.push(media);
            }
            // a cdrom is not a disk, the media check above covers it
            continue;
        }

        if !is_disk_slot(key) {
            continue;
        }

        if is_local_disk(value) {
            finding.local_disks.push(key.clone());
        }
        finding.total_disk_gb += disk_size_gb(value).unwrap_or(0.0);
    }

    finding.has_local_disks = !finding.local_disks.is_empty();
    finding.boot_defects = boot_order_defects(config);
    finding
}

/// `scsi0`, `virtio12`, `mp3` or `rootfs`.
pub fn is_disk_slot(key: &str) -> bool {
    key == "rootfs" || is_slot(key, &DISK_SLOT_PREFIXES)
}

fn is_slot(key: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| {
        key.strip_prefix(prefix)
            .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    })
}

pub fn is_local_storage(reference: &str) -> bool {
    LOCAL_STORAGE_PREFIXES
        .iter()
        .any(|prefix| reference.starts_with(prefix))
}

fn is_local_disk(value: &str) -> bool {
    value.contains(SHARED_OFF_MARKER) || is_local_storage(value)
}

fn removable_media(key: &str, value: &str) -> Option<RemovableMedia> {
    let path = value.split(',').next().unwrap_or("").trim();
    if path.is_empty() || path == "none" {
        return None;
    }

    Some(RemovableMedia {
        device: key.to_string(),
        media: path.to_string(),
        local_only: is_local_storage(path),
    })
}

/// Pulls `size=<integer><M|G|T>` out of a disk value, normalized to GB.
pub fn disk_size_gb(value: &str) -> Option<f64> {
    value.split(',').find_map(|part| {
        let raw = part.trim().strip_prefix("size=")?;
        let unit = raw.chars().last()?;
        let amount: u64 = raw[..raw.len() - unit.len_utf8()].parse().ok()?;
        let amount = amount as f64;
        match unit {
            'M' => Some(amount / 1024.0),
            'G' => Some(amount),
            'T' => Some(amount * 1024.0),
            _ => None,
        }
    })
}

/// Devices named in `boot: order=...` that don't exist in the config.
///
/// Presence is what counts: a key with an empty value is still there.
pub fn boot_order_defects(config: &HashMap<String, String>) -> Vec<String> {
    let Some(boot) = config.get("boot") else {
        return Vec::new();
    };
    let Some(start) = boot.find("order=") else {
        return Vec::new();
    };

    let mut defects: Vec<String> = Vec::new();
    for token in boot[start + "order=".len()..].split([';', ',']) {
        let token = token.trim();
        // next `key=value` option of the boot directive, not a device
        if token.contains('=') {
            break;
        }
        if token.is_empty() || token == "net0" || config.contains_key(token) {
            continue;
        }
        if !defects.iter().any(|d| d == token) {
            defects.push(token.to_string());
        }
    }
    defects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn debian_installer_config() {
        let raw = config(&[
            ("scsi0", "local-lvm:vm-100-disk-0,size=50G"),
            ("ide2", "local:iso/debian.iso,media=cdrom"),
            ("boot", "order=scsi0;net5"),
        ]);

        let finding = inspect(&raw);
        assert!(finding.has_local_disks);
        assert_eq!(finding.local_disks, vec!["scsi0".to_string()]);
        assert_eq!(
            finding.removable_media,
            vec![RemovableMedia {
                device: "ide2".into(),
                media: "local:iso/debian.iso".into(),
                local_only: true,
            }]
        );
        assert_eq!(finding.boot_defects, vec!["net5".to_string()]);
        assert_eq!(finding.total_disk_gb, 50.0);
    }

    #[test]
    fn shared_storage_is_not_local() {
        let raw = config(&[
            ("scsi0", "ceph-pool:vm-101-disk-0,size=32G"),
            ("virtio1", "nfs-store:101/vm-101-disk-1.qcow2,size=1T"),
            ("net0", "virtio=AA:BB:CC:DD:EE:FF,bridge=vmbr0"),
        ]);
        let finding = inspect(&raw);
        assert!(!finding.has_local_disks);
        assert_eq!(finding.total_disk_gb, 32.0 + 1024.0);
    }

    #[test]
    fn shared_off_marker_counts_as_local() {
        let raw = config(&[("mp0", "/srv/data,mp=/data,shared=0")]);
        assert!(inspect(&raw).has_local_disks);
    }

    #[test]
    fn container_rootfs_is_a_disk_slot() {
        let raw = config(&[("rootfs", "local-zfs:subvol-200-disk-0,size=512M")]);
        let finding = inspect(&raw);
        assert!(finding.has_local_disks);
        assert_eq!(finding.total_disk_gb, 0.5);
    }

    #[test]
    fn empty_cdrom_is_ignored() {
        let raw = config(&[("ide2", "none,media=cdrom")]);
        let finding = inspect(&raw);
        assert!(finding.removable_media.is_empty());
        assert!(!finding.has_local_disks);
    }

    #[test]
    fn shared_iso_is_not_local_only() {
        let raw = config(&[("sata1", "cephfs:iso/virtio-win.iso,media=cdrom")]);
        let media = &inspect(&raw).removable_media;
        assert_eq!(media.len(), 1);
        assert!(!media[0].local_only);
    }

    #[test]
    fn boot_order_presence_not_value() {
        let raw = config(&[("scsi0", ""), ("boot", "order=scsi0;net0")]);
        assert!(boot_order_defects(&raw).is_empty());
    }

    #[test]
    fn boot_order_defects_are_reported_once() {
        let raw = config(&[("boot", "order=sata3;net1;sata3")]);
        assert_eq!(
            boot_order_defects(&raw),
            vec!["sata3".to_string(), "net1".to_string()]
        );
    }

    #[test]
    fn legacy_boot_string_has_no_order() {
        let raw = config(&[("boot", "cdn"), ("bootdisk", "scsi0")]);
        assert!(boot_order_defects(&raw).is_empty());
    }

    #[test]
    fn malformed_values_contribute_nothing() {
        let raw = config(&[
            ("scsi0", "size=abcG"),
            ("scsi1", "size=10X"),
            ("scsi2", "size="),
            ("unused0", "local-lvm:vm-100-disk-9"),
            ("scsix", "local:whatever"),
        ]);
        let finding = inspect(&raw);
        assert!(!finding.has_local_disks);
        assert_eq!(finding.total_disk_gb, 0.0);
    }

    #[test]
    fn inspection_is_repeatable() {
        let raw = config(&[
            ("scsi0", "local-lvm:vm-100-disk-0,size=50G"),
            ("sata0", "local:vm-100-disk-1,size=2T"),
            ("ide0", "local:iso/a.iso,media=cdrom"),
            ("boot", "order=ide9;scsi0"),
        ]);
        assert_eq!(inspect(&raw), inspect(&raw));
    }
}
