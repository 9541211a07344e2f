//! CSI driver implementation.
//!
//! This module contains the core driver components:
//! - `Config`: Driver configuration
//! - `Driver`: The main CSI driver that runs gRPC servers
//! - `DriverState`: Shared state backing the Node and Identity services
//!   (in `state` submodule)

mod state;

pub use state::{DriverState, VolumeStats};

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tonic::transport::Server;
use tracing::info;

use crate::csi::{FILE_DESCRIPTOR_SET, identity_server::IdentityServer, node_server::NodeServer};
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::limits::AttachLimitOptions;
use crate::metadata::MetadataService;
use crate::mounter::Mounter;
use crate::node::NodeService;

pub const DRIVER_NAME: &str = "ebs.csi.aws.com";
pub const DRIVER_VERSION: &str = "0.1.0";

/// Zone topology key owned by this driver.
pub const ZONE_TOPOLOGY_KEY: &str = "topology.ebs.csi.aws.com/zone";
/// Standard Kubernetes zone topology key.
pub const WELL_KNOWN_ZONE_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";
/// Standard Kubernetes OS label.
pub const OS_TOPOLOGY_KEY: &str = "kubernetes.io/os";

/// Outpost placement topology keys, set only on outpost-hosted nodes.
pub const OUTPOST_REGION_KEY: &str = "topology.ebs.csi.aws.com/region";
pub const OUTPOST_PARTITION_KEY: &str = "topology.ebs.csi.aws.com/partition";
pub const OUTPOST_ACCOUNT_KEY: &str = "topology.ebs.csi.aws.com/account-id";
pub const OUTPOST_ID_KEY: &str = "topology.ebs.csi.aws.com/outpost-id";

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub version: String,
    pub node_id: String,
    pub endpoint: String,
    /// Fixed volume limit override; negative means "calculate".
    pub volume_attach_limit: i64,
    /// Attachment slots held back for non-CSI use; -1 derives it from the
    /// instance's block device mappings.
    pub reserved_volume_attachments: i64,
    /// Pin new xfs filesystems to a feature set old kernels can mount.
    pub legacy_xfs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DRIVER_NAME.to_string(),
            version: DRIVER_VERSION.to_string(),
            node_id: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            endpoint: "unix:///var/run/csi/csi.sock".to_string(),
            volume_attach_limit: -1,
            reserved_volume_attachments: -1,
            legacy_xfs: false,
        }
    }
}

impl Config {
    /// Reject option combinations that contradict each other.
    pub fn validate(&self) -> Result<()> {
        if self.volume_attach_limit >= 0 && self.reserved_volume_attachments >= 0 {
            return Err(Error::ConflictingAttachLimits);
        }
        Ok(())
    }

    pub fn attach_limit_options(&self) -> AttachLimitOptions {
        AttachLimitOptions {
            volume_attach_limit: self.volume_attach_limit,
            reserved_volume_attachments: self.reserved_volume_attachments,
        }
    }
}

/// The CSI node driver.
pub struct Driver {
    state: Arc<DriverState>,
}

impl Driver {
    pub fn new(
        config: Config,
        mounter: Arc<dyn Mounter>,
        metadata: Arc<dyn MetadataService>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(DriverState::new(config, mounter, metadata)),
        })
    }

    /// Run the CSI driver.
    pub async fn run(&self) -> Result<()> {
        let endpoint = &self.state.config.endpoint;
        info!(
            name = %self.state.config.name,
            version = %self.state.config.version,
            endpoint,
            "starting CSI node driver"
        );

        if let Some(path) = endpoint.strip_prefix("unix://") {
            self.run_unix(path).await
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            let addr: SocketAddr = addr.parse().map_err(|_| Error::InvalidEndpoint {
                endpoint: endpoint.clone(),
            })?;
            self.run_tcp(addr).await
        } else {
            Err(Error::InvalidEndpoint {
                endpoint: endpoint.clone(),
            })
        }
    }

    async fn run_unix(&self, path: &str) -> Result<()> {
        let _ = fs::remove_file(path);
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);

        self.serve_grpc(incoming).await
    }

    async fn run_tcp(&self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

        self.serve_grpc(incoming).await
    }

    async fn serve_grpc<S, IO, E>(&self, incoming: S) -> Result<()>
    where
        S: tokio_stream::Stream<Item = std::result::Result<IO, E>> + Send + 'static,
        IO: tokio::io::AsyncRead
            + tokio::io::AsyncWrite
            + tonic::transport::server::Connected
            + Send
            + Unpin
            + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let reflection = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Server::builder()
            .add_service(reflection)
            .add_service(IdentityServer::new(IdentityService::new(
                self.state.clone(),
            )))
            .add_service(NodeServer::new(NodeService::new(self.state.clone())))
            .serve_with_incoming(incoming)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(())
    }
}
