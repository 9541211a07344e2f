//! CSI Node service implementation.
//!
//! Thin gRPC layer that delegates to DriverState for business logic.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::csi;
use crate::driver::{DriverState, VolumeStats};
use crate::error::{Error, Require};
use crate::volume::{self, FormatOptions, DEFAULT_FS_TYPE, DEVICE_PATH_KEY};

pub struct NodeService {
    state: Arc<DriverState>,
}

impl NodeService {
    pub fn new(state: Arc<DriverState>) -> Self {
        Self { state }
    }
}

/// Parsed volume capability access type.
enum Access {
    Block,
    Mount { fs_type: String, flags: Vec<String> },
}

fn parse_capability(cap: &csi::VolumeCapability) -> Result<Access, Status> {
    use csi::volume_capability::access_mode::Mode;

    let mode = cap
        .access_mode
        .as_ref()
        .map(|m| m.mode())
        .unwrap_or(Mode::Unknown);
    match mode {
        Mode::SingleNodeWriter
        | Mode::SingleNodeReaderOnly
        | Mode::MultiNodeReaderOnly
        | Mode::MultiNodeSingleWriter
        | Mode::MultiNodeMultiWriter => {}
        _ => return Err(Error::UnsupportedAccessMode.into()),
    }

    match &cap.access_type {
        Some(csi::volume_capability::AccessType::Block(_)) => Ok(Access::Block),
        Some(csi::volume_capability::AccessType::Mount(mount)) => {
            let fs_type = if mount.fs_type.is_empty() {
                DEFAULT_FS_TYPE.to_string()
            } else {
                mount.fs_type.clone()
            };
            if !volume::is_supported_fs_type(&fs_type) {
                return Err(Error::UnsupportedFsType(fs_type).into());
            }
            Ok(Access::Mount {
                fs_type,
                flags: mount.mount_flags.clone(),
            })
        }
        None => Err(Error::MissingCapability.into()),
    }
}

fn device_hint(publish_context: &std::collections::HashMap<String, String>) -> Result<String, Status> {
    match publish_context.get(DEVICE_PATH_KEY) {
        Some(path) if !path.is_empty() => Ok(path.clone()),
        _ => Err(Error::DevicePathNotProvided.into()),
    }
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let staging_path = req.staging_target_path.require("staging target path")?;
        let volume_cap = req.volume_capability.require("volume capability")?;

        let (fs_type, mount_flags) = match parse_capability(&volume_cap)? {
            // Raw block volumes are published straight from the device node;
            // there is nothing to stage.
            Access::Block => return Ok(Response::new(csi::NodeStageVolumeResponse {})),
            Access::Mount { fs_type, flags } => (fs_type, flags),
        };

        let device = device_hint(&req.publish_context)?;
        let partition = volume::partition(&req.volume_context)?;
        let format_options = FormatOptions::from_volume_context(&req.volume_context, &fs_type)?;

        self.state
            .stage_volume(
                &volume_id,
                &device,
                &staging_path,
                &fs_type,
                &mount_flags,
                &format_options,
                partition,
            )
            .await?;

        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let staging_path = req.staging_target_path.require("staging target path")?;

        self.state.unstage_volume(&volume_id, &staging_path).await?;
        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let staging_path = req.staging_target_path.require("staging target path")?;
        let target_path = req.target_path.require("target path")?;
        let volume_cap = req.volume_capability.require("volume capability")?;

        match parse_capability(&volume_cap)? {
            Access::Block => {
                let device = device_hint(&req.publish_context)?;
                let partition = volume::partition(&req.volume_context)?;
                self.state
                    .publish_block(&volume_id, &device, partition, &target_path, req.readonly)
                    .await?;
            }
            Access::Mount { fs_type, flags } => {
                self.state
                    .publish_mount(
                        &volume_id,
                        &staging_path,
                        &target_path,
                        Some(&fs_type),
                        &flags,
                        req.readonly,
                    )
                    .await?;
            }
        }

        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let target_path = req.target_path.require("target path")?;

        self.state
            .unpublish_volume(&volume_id, &target_path)
            .await?;
        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let req = request.into_inner();
        let _volume_id = req.volume_id.require("volume ID")?;
        let volume_path = req.volume_path.require("volume path")?;

        let usage = match self.state.volume_stats(&volume_path).await? {
            VolumeStats::Block { total_bytes } => vec![csi::VolumeUsage {
                available: 0,
                total: total_bytes,
                used: 0,
                unit: csi::volume_usage::Unit::Bytes as i32,
            }],
            VolumeStats::Filesystem(stats) => vec![
                csi::VolumeUsage {
                    available: stats.available_bytes,
                    total: stats.total_bytes,
                    used: stats.used_bytes,
                    unit: csi::volume_usage::Unit::Bytes as i32,
                },
                csi::VolumeUsage {
                    available: stats.available_inodes,
                    total: stats.total_inodes,
                    used: stats.used_inodes,
                    unit: csi::volume_usage::Unit::Inodes as i32,
                },
            ],
        };

        Ok(Response::new(csi::NodeGetVolumeStatsResponse { usage }))
    }

    async fn node_expand_volume(
        &self,
        request: Request<csi::NodeExpandVolumeRequest>,
    ) -> Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        let req = request.into_inner();
        let volume_id = req.volume_id.require("volume ID")?;
        let volume_path = req.volume_path.require("volume path")?;

        let block_access = match &req.volume_capability {
            Some(cap) => matches!(parse_capability(cap)?, Access::Block),
            None => false,
        };

        let capacity_bytes = self
            .state
            .expand_volume(&volume_id, &volume_path, block_access)
            .await?;

        Ok(Response::new(csi::NodeExpandVolumeResponse {
            capacity_bytes,
        }))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        use csi::node_service_capability::rpc::Type;

        let capabilities = [
            Type::StageUnstageVolume,
            Type::GetVolumeStats,
            Type::ExpandVolume,
        ]
        .into_iter()
        .map(|rpc_type| csi::NodeServiceCapability {
            r#type: Some(csi::node_service_capability::Type::Rpc(
                csi::node_service_capability::Rpc {
                    r#type: rpc_type as i32,
                },
            )),
        })
        .collect();

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> Result<Response<csi::NodeGetInfoResponse>, Status> {
        let (node_id, max_volumes_per_node, segments) = self.state.node_info();

        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id,
            max_volumes_per_node,
            accessible_topology: Some(csi::Topology { segments }),
        }))
    }
}
