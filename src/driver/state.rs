//! Driver state management.
//!
//! This module contains DriverState which manages:
//! - Volume staging and publishing (mount orchestration)
//! - Online filesystem expansion
//! - Volume usage statistics
//! - Node identity and attach limits

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::device;
use crate::error::{Error, Result};
use crate::inflight::InFlight;
use crate::limits;
use crate::metadata::MetadataService;
use crate::mounter::{FsStats, Mounter};
use crate::volume::FormatOptions;

use super::{
    Config, OS_TOPOLOGY_KEY, OUTPOST_ACCOUNT_KEY, OUTPOST_ID_KEY, OUTPOST_PARTITION_KEY,
    OUTPOST_REGION_KEY, WELL_KNOWN_ZONE_TOPOLOGY_KEY, ZONE_TOPOLOGY_KEY,
};

/// Usage report for one volume path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStats {
    /// Raw block device: only the total size is knowable.
    Block { total_bytes: i64 },
    /// Mounted filesystem: byte and inode usage.
    Filesystem(FsStats),
}

/// Shared driver state.
pub struct DriverState {
    pub config: Config,
    pub mounter: Arc<dyn Mounter>,
    pub metadata: Arc<dyn MetadataService>,
    inflight: InFlight,
}

impl DriverState {
    pub fn new(
        config: Config,
        mounter: Arc<dyn Mounter>,
        metadata: Arc<dyn MetadataService>,
    ) -> Self {
        Self {
            config,
            mounter,
            metadata,
            inflight: InFlight::new(),
        }
    }

    /// Stage a volume: wait for the device, then format if blank and mount
    /// at the staging path. Idempotent when the device is already mounted
    /// there.
    #[allow(clippy::too_many_arguments)]
    pub async fn stage_volume(
        &self,
        volume_id: &str,
        device_hint: &str,
        staging_path: &str,
        fs_type: &str,
        mount_flags: &[String],
        format_options: &FormatOptions,
        partition: u32,
    ) -> Result<()> {
        let _guard = self.inflight.guard(volume_id)?;

        let device = self.resolve_device(device_hint, volume_id, partition).await?;
        let staging = Path::new(staging_path);

        if !self.mounter.path_exists(staging).await? {
            self.mounter.make_dir(staging).await?;
        }

        if let Some((mounted_device, _)) = self.mounter.device_name_from_mount(staging).await? {
            if Path::new(&mounted_device) == device {
                info!(volume_id, staging_path, "volume already staged");
                return Ok(());
            }
            debug!(
                volume_id,
                staging_path,
                mounted_device,
                "staging path mounted with a different device"
            );
        }

        let mkfs_args = format_options.mkfs_args(fs_type, self.config.legacy_xfs);
        info!(volume_id, device = %device.display(), staging_path, fs_type, "staging volume");
        self.mounter
            .format_and_mount(&device, staging, fs_type, mount_flags, &mkfs_args)
            .await?;

        // The volume may have been expanded while detached; the filesystem
        // still carries the old size after a fresh mount.
        if self.mounter.needs_resize(&device, staging).await? {
            info!(volume_id, device = %device.display(), "resizing filesystem after stage");
            self.mounter.resize(&device, staging).await?;
        }

        Ok(())
    }

    /// Unmount the staging path. Succeeds if nothing is mounted there.
    pub async fn unstage_volume(&self, volume_id: &str, staging_path: &str) -> Result<()> {
        let _guard = self.inflight.guard(volume_id)?;
        let staging = Path::new(staging_path);

        match self.mounter.device_name_from_mount(staging).await? {
            None => {
                info!(volume_id, staging_path, "staging path not mounted, nothing to do");
                Ok(())
            }
            Some((device, refcount)) => {
                if refcount > 1 {
                    warn!(
                        volume_id,
                        device, refcount, "device is mounted elsewhere, unmounting staging path"
                    );
                }
                info!(volume_id, staging_path, "unstaging volume");
                self.mounter.unmount(staging).await
            }
        }
    }

    /// Bind-mount the staged filesystem into the workload target path.
    pub async fn publish_mount(
        &self,
        volume_id: &str,
        staging_path: &str,
        target_path: &str,
        fs_type: Option<&str>,
        mount_flags: &[String],
        readonly: bool,
    ) -> Result<()> {
        let _guard = self.inflight.guard(volume_id)?;
        let target = Path::new(target_path);

        if self.already_published(target).await? {
            info!(volume_id, target_path, "volume already published");
            return Ok(());
        }

        self.mounter.make_dir(target).await?;

        let options = publish_options(mount_flags, readonly);
        info!(volume_id, staging_path, target_path, "publishing volume");
        self.mounter
            .mount(Path::new(staging_path), target, fs_type, &options)
            .await
    }

    /// Bind-mount the raw device node onto a file in the target path.
    pub async fn publish_block(
        &self,
        volume_id: &str,
        device_hint: &str,
        partition: u32,
        target_path: &str,
        readonly: bool,
    ) -> Result<()> {
        let _guard = self.inflight.guard(volume_id)?;
        let target = Path::new(target_path);

        let device = self.resolve_device(device_hint, volume_id, partition).await?;

        if self.already_published(target).await? {
            info!(volume_id, target_path, "volume already published");
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            self.mounter.make_dir(parent).await?;
        }
        self.mounter.make_file(target).await?;

        let options = publish_options(&[], readonly);
        info!(volume_id, device = %device.display(), target_path, "publishing block volume");
        self.mounter.mount(&device, target, None, &options).await
    }

    /// Unmount the target path. Succeeds if nothing is mounted there.
    pub async fn unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<()> {
        let _guard = self.inflight.guard(volume_id)?;
        let target = Path::new(target_path);

        match self.mounter.device_name_from_mount(target).await? {
            None => {
                info!(volume_id, target_path, "target path not mounted, nothing to do");
                Ok(())
            }
            Some(_) => {
                info!(volume_id, target_path, "unpublishing volume");
                self.mounter.unmount(target).await
            }
        }
    }

    /// Grow the filesystem at `volume_path` to fill its device. Returns the
    /// device size after the resize. For block access the device is already
    /// as large as it will get, so only the size is reported.
    pub async fn expand_volume(
        &self,
        volume_id: &str,
        volume_path: &str,
        block_access: bool,
    ) -> Result<i64> {
        let _guard = self.inflight.guard(volume_id)?;
        let path = Path::new(volume_path);

        if block_access || self.mounter.is_block_device(path).await? {
            return self.mounter.block_size_bytes(path).await;
        }

        let (device, _) = self
            .mounter
            .device_name_from_mount(path)
            .await?
            .ok_or_else(|| Error::DeviceNotFound {
                device: volume_path.to_string(),
                waited_ms: 0,
                last_error: "no device mounted at this path".to_string(),
            })?;

        // Normalize the mount-table device name to a present device node.
        let device = self.resolve_device(&device, volume_id, 0).await?;

        info!(volume_id, device = %device.display(), volume_path, "expanding filesystem");
        self.mounter.resize(&device, path).await?;
        self.mounter.block_size_bytes(&device).await
    }

    /// Usage of the filesystem or block device at `volume_path`.
    pub async fn volume_stats(&self, volume_path: &str) -> Result<VolumeStats> {
        let path = Path::new(volume_path);

        if !self.mounter.path_exists(path).await? {
            return Err(Error::PathNotFound(volume_path.to_string()));
        }

        if self.mounter.is_block_device(path).await? {
            let total_bytes = self.mounter.block_size_bytes(path).await?;
            return Ok(VolumeStats::Block { total_bytes });
        }

        Ok(VolumeStats::Filesystem(
            self.mounter.volume_stats(path).await?,
        ))
    }

    /// Node identity for NodeGetInfo: instance ID, attach limit and topology.
    /// Metadata refresh failures are logged and the previous snapshot used.
    pub fn node_info(&self) -> (String, i64, HashMap<String, String>) {
        if let Err(e) = self.metadata.refresh() {
            warn!(error = %e, "metadata refresh failed, using previous snapshot");
        }

        let node_id = {
            let instance_id = self.metadata.instance_id();
            if instance_id.is_empty() {
                self.config.node_id.clone()
            } else {
                instance_id
            }
        };
        let max_volumes =
            limits::volumes_limit(self.config.attach_limit_options(), self.metadata.as_ref());

        let mut segments = HashMap::new();
        let zone = self.metadata.availability_zone();
        if !zone.is_empty() {
            segments.insert(ZONE_TOPOLOGY_KEY.to_string(), zone.clone());
            segments.insert(WELL_KNOWN_ZONE_TOPOLOGY_KEY.to_string(), zone);
        }
        segments.insert(OS_TOPOLOGY_KEY.to_string(), "linux".to_string());
        if let Some(arn) = self.metadata.outpost_arn() {
            segments.insert(OUTPOST_REGION_KEY.to_string(), arn.region);
            segments.insert(OUTPOST_PARTITION_KEY.to_string(), arn.partition);
            segments.insert(OUTPOST_ACCOUNT_KEY.to_string(), arn.account_id);
            segments.insert(OUTPOST_ID_KEY.to_string(), arn.outpost_id);
        }

        (node_id, max_volumes, segments)
    }

    async fn resolve_device(
        &self,
        hint: &str,
        volume_id: &str,
        partition: u32,
    ) -> Result<std::path::PathBuf> {
        device::resolve(
            self.mounter.as_ref(),
            hint,
            volume_id,
            partition,
            &self.metadata.region(),
        )
        .await
    }

    async fn already_published(&self, target: &Path) -> Result<bool> {
        Ok(self.mounter.device_name_from_mount(target).await?.is_some())
    }
}

fn publish_options(mount_flags: &[String], readonly: bool) -> Vec<String> {
    let mut options = vec!["bind".to_string()];
    if readonly {
        options.push("ro".to_string());
    }
    options.extend(mount_flags.iter().cloned());
    options
}
