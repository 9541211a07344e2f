//! ebs-csi: node-side CSI plugin for cloud block volumes.
//!
//! This crate implements the node half of the Container Storage Interface
//! (CSI) specification: staging, publishing, resizing and reporting on
//! remote block volumes attached to the host instance.

// Generated protobuf code has doc formatting issues
#![allow(clippy::doc_overindented_list_items)]
#![allow(clippy::doc_lazy_continuation)]
// tonic::Status is large by design (176 bytes)
#![allow(clippy::result_large_err)]

pub mod device;
pub mod driver;
pub mod error;
pub mod identity;
pub mod inflight;
pub mod limits;
pub mod metadata;
pub mod mounter;
pub mod node;
pub mod volume;

pub mod csi {
    tonic::include_proto!("csi.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("ebs_csi_descriptor");
}

pub use driver::{Config, Driver};
pub use error::{Error, Result};
pub use metadata::{InstanceMetadata, MetadataService, OutpostArn};
pub use mounter::{Mounter, SystemMounter};

#[cfg(test)]
pub(crate) mod test_util;
