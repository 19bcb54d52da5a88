/*
* Migration Preflight Validator
* -----------------------------
* @project: cluster-lifecycle-manager
*
* Turns inspector findings into the things an operator has to hear about
* BEFORE we poke the control plane:
*
* - warnings: the migration may still work, but read this first
* - blocks:   we refuse to issue the mutating call at all
*
* Plus two normalizations the orchestrator must apply no matter what:
* containers never migrate online, and local disks force the
* "with local disks" flag on.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cluster::models::GuestType;
use crate::core::inspector::ConfigFinding;

/// Above this much provisioned disk the live-transfer ticket may expire.
pub const LARGE_DISK_THRESHOLD_GB: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreflightWarning {
    LocalRemovableMedia { device: String, media: String },
    BootOrderDefects { devices: Vec<String> },
    LocalDisksRequired { disks: Vec<String> },
    LargeDiskLiveMigration { total_gb: f64, threshold_gb: f64 },
}

impl fmt::Display for PreflightWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightWarning::LocalRemovableMedia { device, media } => write!(
                f,
                "{device} has {media} mounted from local storage; eject it or move the image to shared storage"
            ),
            PreflightWarning::BootOrderDefects { devices } => write!(
                f,
                "boot order references missing devices: {}",
                devices.join(", ")
            ),
            PreflightWarning::LocalDisksRequired { disks } => write!(
                f,
                "local disks ({}) will be copied along with the guest",
                disks.join(", ")
            ),
            PreflightWarning::LargeDiskLiveMigration { total_gb, threshold_gb } => write!(
                f,
                "{total_gb:.0} GB of disk exceeds {threshold_gb:.0} GB; the live-transfer ticket may expire before the copy finishes"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreflightBlock {
    /// Large disks + online mode without an explicit force acknowledgement.
    LargeDiskOnlineNotAcknowledged { total_gb: f64 },
    /// Target node is the node the guest already lives on.
    SameTargetNode { node: String },
}

impl fmt::Display for PreflightBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightBlock::LargeDiskOnlineNotAcknowledged { total_gb } => write!(
                f,
                "online migration of {total_gb:.0} GB requires force; retry with force or migrate offline"
            ),
            PreflightBlock::SameTargetNode { node } => {
                write!(f, "guest already runs on {node}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub warnings: Vec<PreflightWarning>,
    pub blocks: Vec<PreflightBlock>,
    /// Online mode after container normalization.
    pub online: bool,
    /// Local disks were found, so they have to travel with the guest.
    pub requires_local_disks: bool,
    /// True when live mode was asked for but silently dropped.
    pub downgraded_to_offline: bool,
}

impl ValidationResult {
    pub fn is_blocked(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn summary(&self) -> String {
        self.blocks
            .iter()
            .map(ToString::to_string)
            .chain(self.warnings.iter().map(ToString::to_string))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct PreflightValidator {
    large_disk_threshold_gb: f64,
    force_large_online: bool,
}

impl Default for PreflightValidator {
    fn default() -> Self {
        Self::new(LARGE_DISK_THRESHOLD_GB)
    }
}

impl PreflightValidator {
    pub fn new(large_disk_threshold_gb: f64) -> Self {
        Self {
            large_disk_threshold_gb,
            force_large_online: false,
        }
    }

    /// Operator said "yes, I know the disks are huge, go online anyway".
    pub fn acknowledge_large_online(mut self, force: bool) -> Self {
        self.force_large_online = force;
        self
    }

    pub fn threshold_gb(&self) -> f64 {
        self.large_disk_threshold_gb
    }

    pub fn validate(
        &self,
        finding: &ConfigFinding,
        guest_type: GuestType,
        live_requested: bool,
    ) -> ValidationResult {
        let mut result = ValidationResult {
            online: live_requested && guest_type.supports_live_migration(),
            downgraded_to_offline: live_requested && !guest_type.supports_live_migration(),
            requires_local_disks: finding.has_local_disks,
            ..Default::default()
        };

        for media in finding.removable_media.iter().filter(|m| m.local_only) {
            result.warnings.push(PreflightWarning::LocalRemovableMedia {
                device: media.device.clone(),
                media: media.media.clone(),
            });
        }

        if !finding.boot_defects.is_empty() {
            result.warnings.push(PreflightWarning::BootOrderDefects {
                devices: finding.boot_defects.clone(),
            });
        }

        if finding.has_local_disks {
            result.warnings.push(PreflightWarning::LocalDisksRequired {
                disks: finding.local_disks.clone(),
            });
        }

        if result.online && finding.total_disk_gb > self.large_disk_threshold_gb {
            result.warnings.push(PreflightWarning::LargeDiskLiveMigration {
                total_gb: finding.total_disk_gb,
                threshold_gb: self.large_disk_threshold_gb,
            });
            if !self.force_large_online {
                result.blocks.push(PreflightBlock::LargeDiskOnlineNotAcknowledged {
                    total_gb: finding.total_disk_gb,
                });
            }
        }

        result
    }
}
