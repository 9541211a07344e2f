//! Attach-limit calculator.
//!
//! Computes how many volumes the node can still accept, reported through
//! NodeGetInfo as `max_volumes_per_node`. The budget depends on instance
//! generation: legacy instances have a fixed block-device budget, while
//! nitro instances share attachment slots between volumes and network
//! interfaces, with per-type exceptions baked into the tables below.

use crate::metadata::MetadataService;

/// Shared attachment slots on a nitro instance.
const NITRO_MAX_ATTACHMENTS: i64 = 28;
/// Block-device budget on pre-nitro instances.
const LEGACY_MAX_ATTACHMENTS: i64 = 39;

/// Operator-provided limit overrides.
///
/// `volume_attach_limit >= 0` bypasses the calculation entirely.
/// `reserved_volume_attachments == -1` means "derive from the instance's
/// block device mappings plus the root volume"; any other value is taken
/// verbatim. The two flags are mutually exclusive at config validation.
#[derive(Debug, Clone, Copy)]
pub struct AttachLimitOptions {
    pub volume_attach_limit: i64,
    pub reserved_volume_attachments: i64,
}

impl Default for AttachLimitOptions {
    fn default() -> Self {
        Self {
            volume_attach_limit: -1,
            reserved_volume_attachments: -1,
        }
    }
}

/// Number of volumes this node can accept, never below 1.
pub fn volumes_limit(options: AttachLimitOptions, metadata: &dyn MetadataService) -> i64 {
    if options.volume_attach_limit >= 0 {
        return options.volume_attach_limit;
    }

    let instance_type = metadata.instance_type();
    let nitro = is_nitro(&instance_type);

    let reserved = if options.reserved_volume_attachments == -1 {
        // Block device mappings cover attached instance storage; the root
        // volume occupies one more slot on top.
        metadata.num_block_device_mappings() + 1
    } else {
        options.reserved_volume_attachments
    };

    let mut available = if nitro {
        NITRO_MAX_ATTACHMENTS
    } else {
        LEGACY_MAX_ATTACHMENTS
    };

    let volume_limit = ebs_volume_limit(&instance_type);
    if let Some(limit) = volume_limit {
        available = available.min(limit);
    }

    if let Some(dedicated) = dedicated_volume_limit(&instance_type) {
        // Dedicated-limit instances do not share slots with network
        // interfaces at all.
        available = dedicated;
    } else if nitro {
        let enis = metadata.num_attached_enis();
        let slots = reserved_slots(&instance_type);
        if volume_limit.is_some() {
            // Per-type volume limits already account for the primary ENI.
            available -= (enis - 1) + slots;
        } else {
            available -= enis + slots;
        }
    }

    (available - reserved).max(1)
}

/// Pre-nitro instance families. Everything unlisted runs on nitro.
fn is_nitro(instance_type: &str) -> bool {
    let family = instance_type.split('.').next().unwrap_or(instance_type);
    !matches!(
        family,
        "t1" | "t2"
            | "m1"
            | "m2"
            | "m3"
            | "m4"
            | "c1"
            | "c3"
            | "c4"
            | "cc2"
            | "cr1"
            | "r3"
            | "r4"
            | "d2"
            | "g2"
            | "g3"
            | "g3s"
            | "h1"
            | "hs1"
            | "i2"
            | "i3"
            | "p2"
            | "p3"
            | "x1"
            | "x1e"
            | "f1"
    )
}

/// Instance types with a dedicated volume budget, independent of attached
/// network interfaces.
fn dedicated_volume_limit(instance_type: &str) -> Option<i64> {
    match instance_type {
        "m7i.48xlarge" | "m7i.metal-48xl" | "m7a.48xlarge" | "m7a.metal-48xl"
        | "r7i.48xlarge" | "r7i.metal-48xl" | "r7a.48xlarge" | "c7i.48xlarge"
        | "c7i.metal-48xl" => Some(128),
        _ => None,
    }
}

/// Per-type volume limits lower than the shared attachment budget.
fn ebs_volume_limit(instance_type: &str) -> Option<i64> {
    match instance_type {
        "d3.8xlarge" | "d3en.12xlarge" => Some(3),
        "g5.48xlarge" => Some(9),
        "inf1.xlarge" | "inf1.2xlarge" => Some(26),
        "inf1.6xlarge" => Some(23),
        "inf1.24xlarge" => Some(11),
        "mac1.metal" => Some(16),
        "u-12tb1.metal" => Some(19),
        "u-18tb1.metal" | "u-24tb1.metal" => Some(19),
        _ => None,
    }
}

/// Attachment slots consumed by instance-store NVMe devices and
/// accelerators on the given type.
fn reserved_slots(instance_type: &str) -> i64 {
    match instance_type {
        "m5d.large" | "m5d.xlarge" | "m5d.2xlarge" => 1,
        "m5d.4xlarge" | "m5d.8xlarge" => 2,
        "g4dn.xlarge" | "g4ad.xlarge" | "g4ad.2xlarge" => 2,
        "g4dn.12xlarge" => 5,
        "dl1.24xlarge" => 12,
        "d3.8xlarge" | "d3en.12xlarge" => 24,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InstanceMetadata;

    fn metadata(instance_type: &str, enis: i64, mappings: i64) -> InstanceMetadata {
        InstanceMetadata {
            instance_type: instance_type.to_string(),
            num_attached_enis: enis,
            num_block_device_mappings: mappings,
            ..Default::default()
        }
    }

    fn limit(instance_type: &str, enis: i64, mappings: i64, options: AttachLimitOptions) -> i64 {
        volumes_limit(options, &metadata(instance_type, enis, mappings))
    }

    fn defaults() -> AttachLimitOptions {
        AttachLimitOptions::default()
    }

    fn reserved(n: i64) -> AttachLimitOptions {
        AttachLimitOptions {
            volume_attach_limit: -1,
            reserved_volume_attachments: n,
        }
    }

    #[test]
    fn explicit_limit_wins() {
        let options = AttachLimitOptions {
            volume_attach_limit: 10,
            reserved_volume_attachments: -1,
        };
        assert_eq!(limit("t2.medium", 1, 0, options), 10);
        assert_eq!(limit("m7i.48xlarge", 1, 0, options), 10);
    }

    #[test]
    fn legacy_instance_reserves_root_volume() {
        assert_eq!(limit("t2.medium", 1, 0, defaults()), 38);
    }

    #[test]
    fn legacy_instance_with_explicit_reservation() {
        assert_eq!(limit("t2.medium", 1, 0, reserved(3)), 36);
    }

    #[test]
    fn nitro_instance_subtracts_enis() {
        assert_eq!(limit("m5d.large", 3, 0, defaults()), 23);
    }

    #[test]
    fn nitro_instance_saturated_with_enis_clamps_to_one() {
        assert_eq!(limit("t3.xlarge", 40, 0, reserved(0)), 1);
    }

    #[test]
    fn dense_storage_instances_clamp_to_one() {
        assert_eq!(limit("d3en.12xlarge", 1, 0, defaults()), 1);
        assert_eq!(limit("d3.8xlarge", 1, 0, defaults()), 1);
    }

    #[test]
    fn dedicated_limit_instances_ignore_enis() {
        assert_eq!(limit("m7i.48xlarge", 1, 0, defaults()), 127);
        assert_eq!(limit("m7i.48xlarge", 10, 0, defaults()), 127);
    }

    #[test]
    fn per_type_volume_limits() {
        assert_eq!(limit("mac1.metal", 1, 0, defaults()), 15);
        assert_eq!(limit("u-12tb1.metal", 1, 0, defaults()), 18);
        assert_eq!(limit("g5.48xlarge", 1, 0, defaults()), 8);
        assert_eq!(limit("inf1.xlarge", 1, 0, defaults()), 25);
        assert_eq!(limit("inf1.2xlarge", 1, 0, defaults()), 25);
        assert_eq!(limit("inf1.6xlarge", 1, 0, defaults()), 22);
        assert_eq!(limit("inf1.24xlarge", 1, 0, defaults()), 10);
    }

    #[test]
    fn instance_store_slots_reduce_budget() {
        assert_eq!(limit("g4dn.xlarge", 1, 0, defaults()), 24);
        assert_eq!(limit("g4ad.xlarge", 1, 0, defaults()), 24);
        assert_eq!(limit("g4dn.12xlarge", 1, 0, defaults()), 21);
        assert_eq!(limit("dl1.24xlarge", 1, 0, defaults()), 14);
    }

    #[test]
    fn block_device_mappings_add_to_reservation() {
        // Two mapped instance-store devices plus the root volume.
        assert_eq!(limit("t2.medium", 1, 2, defaults()), 36);
    }

    #[test]
    fn nitro_family_classification() {
        assert!(is_nitro("m5.large"));
        assert!(is_nitro("t3.medium"));
        assert!(is_nitro("i3en.xlarge"));
        assert!(is_nitro("u-12tb1.metal"));
        assert!(!is_nitro("t2.medium"));
        assert!(!is_nitro("i3.xlarge"));
        assert!(!is_nitro("r4.large"));
    }
}
