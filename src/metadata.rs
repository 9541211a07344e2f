//! Instance metadata collaborator.
//!
//! The node service reads instance identity (region, zone, instance type,
//! attachment counts, outpost placement) through the [`MetadataService`]
//! trait. The actual fetch belongs to a collaborator; this module ships the
//! trait, the snapshot type, outpost ARN parsing, and an environment-backed
//! implementation used for process wiring and tests.

use std::fmt;
use std::sync::RwLock;

use crate::error::Result;

/// Read-only view of the host instance, refreshed out-of-band.
///
/// Stale reads are tolerated; the attach-limit calculator and NodeGetInfo
/// consume whatever snapshot is current.
pub trait MetadataService: Send + Sync {
    fn region(&self) -> String;
    fn availability_zone(&self) -> String;
    fn instance_id(&self) -> String;
    fn instance_type(&self) -> String;
    fn num_attached_enis(&self) -> i64;
    fn num_block_device_mappings(&self) -> i64;
    fn outpost_arn(&self) -> Option<OutpostArn>;

    /// Best-effort refresh. Failure must never block dependent calls; callers
    /// log it and proceed with the previous snapshot.
    fn refresh(&self) -> Result<()>;
}

/// Outpost placement identity, parsed from
/// `arn:<partition>:outposts:<region>:<account>:outpost/<outpost-id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutpostArn {
    pub partition: String,
    pub region: String,
    pub account_id: String,
    pub outpost_id: String,
}

impl OutpostArn {
    pub fn parse(arn: &str) -> Option<Self> {
        let mut parts = arn.splitn(6, ':');
        let prefix = parts.next()?;
        if prefix != "arn" {
            return None;
        }
        let partition = parts.next()?;
        let service = parts.next()?;
        if service != "outposts" {
            return None;
        }
        let region = parts.next()?;
        let account_id = parts.next()?;
        let resource = parts.next()?;
        let outpost_id = resource.strip_prefix("outpost/").unwrap_or(resource);
        if partition.is_empty() || region.is_empty() || outpost_id.is_empty() {
            return None;
        }
        Some(Self {
            partition: partition.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            outpost_id: outpost_id.to_string(),
        })
    }
}

impl fmt::Display for OutpostArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:outposts:{}:{}:outpost/{}",
            self.partition, self.region, self.account_id, self.outpost_id
        )
    }
}

/// One metadata snapshot. Implements [`MetadataService`] directly so tests
/// and fixed-configuration deployments can use it as-is.
#[derive(Debug, Clone, Default)]
pub struct InstanceMetadata {
    pub region: String,
    pub availability_zone: String,
    pub instance_id: String,
    pub instance_type: String,
    pub num_attached_enis: i64,
    pub num_block_device_mappings: i64,
    pub outpost_arn: Option<OutpostArn>,
}

impl MetadataService for InstanceMetadata {
    fn region(&self) -> String {
        self.region.clone()
    }

    fn availability_zone(&self) -> String {
        self.availability_zone.clone()
    }

    fn instance_id(&self) -> String {
        self.instance_id.clone()
    }

    fn instance_type(&self) -> String {
        self.instance_type.clone()
    }

    fn num_attached_enis(&self) -> i64 {
        self.num_attached_enis
    }

    fn num_block_device_mappings(&self) -> i64 {
        self.num_block_device_mappings
    }

    fn outpost_arn(&self) -> Option<OutpostArn> {
        self.outpost_arn.clone()
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Environment-backed metadata, the wiring point where an instance metadata
/// client plugs in. `refresh` re-reads the environment.
pub struct EnvMetadata {
    inner: RwLock<InstanceMetadata>,
}

impl EnvMetadata {
    pub fn load(node_id_fallback: &str) -> Self {
        Self {
            inner: RwLock::new(Self::snapshot(node_id_fallback)),
        }
    }

    fn snapshot(node_id_fallback: &str) -> InstanceMetadata {
        let env = |key: &str| std::env::var(key).unwrap_or_default();
        let env_count = |key: &str| env(key).parse::<i64>().unwrap_or(0);

        let instance_id = {
            let id = env("EBS_CSI_INSTANCE_ID");
            if id.is_empty() {
                node_id_fallback.to_string()
            } else {
                id
            }
        };

        InstanceMetadata {
            region: env("AWS_REGION"),
            availability_zone: env("AWS_AVAILABILITY_ZONE"),
            instance_id,
            instance_type: env("EBS_CSI_INSTANCE_TYPE"),
            num_attached_enis: env_count("EBS_CSI_ATTACHED_ENIS"),
            num_block_device_mappings: env_count("EBS_CSI_BLOCK_DEVICE_MAPPINGS"),
            outpost_arn: OutpostArn::parse(&env("EBS_CSI_OUTPOST_ARN")),
        }
    }

    fn read(&self) -> InstanceMetadata {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl MetadataService for EnvMetadata {
    fn region(&self) -> String {
        self.read().region
    }

    fn availability_zone(&self) -> String {
        self.read().availability_zone
    }

    fn instance_id(&self) -> String {
        self.read().instance_id
    }

    fn instance_type(&self) -> String {
        self.read().instance_type
    }

    fn num_attached_enis(&self) -> i64 {
        self.read().num_attached_enis
    }

    fn num_block_device_mappings(&self) -> i64 {
        self.read().num_block_device_mappings
    }

    fn outpost_arn(&self) -> Option<OutpostArn> {
        self.read().outpost_arn
    }

    fn refresh(&self) -> Result<()> {
        let node_id = self.read().instance_id;
        let snapshot = Self::snapshot(&node_id);
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpost_arn_parse_valid() {
        let arn =
            OutpostArn::parse("arn:aws:outposts:us-west-2:123456789012:outpost/op-1234567890abcdef0")
                .unwrap();
        assert_eq!(arn.partition, "aws");
        assert_eq!(arn.region, "us-west-2");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.outpost_id, "op-1234567890abcdef0");
    }

    #[test]
    fn outpost_arn_roundtrips_through_display() {
        let text = "arn:aws:outposts:us-west-2:123456789012:outpost/op-1234567890abcdef0";
        let arn = OutpostArn::parse(text).unwrap();
        assert_eq!(arn.to_string(), text);
    }

    #[test]
    fn outpost_arn_rejects_other_services() {
        assert!(OutpostArn::parse("arn:aws:ec2:us-west-2:123456789012:instance/i-0").is_none());
        assert!(OutpostArn::parse("").is_none());
        assert!(OutpostArn::parse("not-an-arn").is_none());
    }
}
