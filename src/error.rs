//! Error types for the CSI node plugin.

use std::io;
use thiserror::Error;
use tonic::Status;

pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for validating required fields.
///
/// Returns `INVALID_ARGUMENT` status if the field is missing or empty.
pub trait Require<T> {
    fn require(self, name: &str) -> std::result::Result<T, Status>;
}

impl Require<String> for String {
    fn require(self, name: &str) -> std::result::Result<String, Status> {
        if self.is_empty() {
            Err(Status::invalid_argument(format!("{name} is required")))
        } else {
            Ok(self)
        }
    }
}

impl<T> Require<T> for Option<T> {
    fn require(self, name: &str) -> std::result::Result<T, Status> {
        self.ok_or_else(|| Status::invalid_argument(format!("{name} is required")))
    }
}

/// Node plugin errors with structured context.
#[derive(Debug, Error)]
pub enum Error {
    #[error("volume capability access_type is required")]
    MissingCapability,

    #[error("unsupported access mode")]
    UnsupportedAccessMode,

    #[error("unsupported filesystem type: {0}")]
    UnsupportedFsType(String),

    #[error("invalid volume parameter {key}={value:?}")]
    InvalidVolumeParameter { key: &'static str, value: String },

    #[error("invalid partition {0:?}: must be a non-negative integer")]
    InvalidPartition(String),

    #[error("device path not provided in publish context")]
    DevicePathNotProvided,

    #[error("too many mount options: {count} exceeds maximum of {max}")]
    TooManyMountOptions { count: usize, max: usize },

    #[error("invalid endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },

    #[error("only one of volume-attach-limit and reserved-volume-attachments may be specified")]
    ConflictingAttachLimits,

    #[error("device {device} not found after {waited_ms}ms: {last_error}")]
    DeviceNotFound {
        device: String,
        waited_ms: u64,
        last_error: String,
    },

    #[error("path {0} does not exist")]
    PathNotFound(String),

    #[error("An operation with the given volume=\"{0}\" is already in progress")]
    OperationPending(String),

    #[error("failed to mount {mount_source} on {target}: {source}")]
    Mount {
        mount_source: String,
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to unmount {target}: {source}")]
    Unmount { target: String, source: io::Error },

    #[error("failed to format {device} as {fs_type}: {message}")]
    Format {
        device: String,
        fs_type: String,
        message: String,
    },

    #[error("failed to resize {device} mounted at {path}: {message}")]
    Resize {
        device: String,
        path: String,
        message: String,
    },

    #[error("failed to stat {path}: {source}")]
    Stat { path: String, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match &err {
            // INVALID_ARGUMENT: Client provided invalid input
            Error::MissingCapability
            | Error::UnsupportedAccessMode
            | Error::UnsupportedFsType(_)
            | Error::InvalidVolumeParameter { .. }
            | Error::InvalidPartition(_)
            | Error::DevicePathNotProvided
            | Error::TooManyMountOptions { .. }
            | Error::InvalidEndpoint { .. }
            | Error::ConflictingAttachLimits => tonic::Status::invalid_argument(err.to_string()),

            // NOT_FOUND: Device or path absent after required resolution
            Error::DeviceNotFound { .. } | Error::PathNotFound(_) => {
                tonic::Status::not_found(err.to_string())
            }

            // ABORTED: Duplicate in-flight operation for the same volume
            Error::OperationPending(_) => tonic::Status::aborted(err.to_string()),

            // INTERNAL: Infrastructure errors
            Error::Mount { .. }
            | Error::Unmount { .. }
            | Error::Format { .. }
            | Error::Resize { .. }
            | Error::Stat { .. }
            | Error::Io(_) => tonic::Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn operation_pending_maps_to_aborted_with_exact_message() {
        let status: Status = Error::OperationPending("vol-test".to_string()).into();
        assert_eq!(status.code(), Code::Aborted);
        assert_eq!(
            status.message(),
            "An operation with the given volume=\"vol-test\" is already in progress"
        );
    }

    #[test]
    fn device_not_found_maps_to_not_found() {
        let status: Status = Error::DeviceNotFound {
            device: "/dev/xvdba".to_string(),
            waited_ms: 12000,
            last_error: "no such file or directory".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("/dev/xvdba"));
        assert!(status.message().contains("no such file or directory"));
    }

    #[test]
    fn invalid_parameter_maps_to_invalid_argument() {
        let status: Status = Error::InvalidVolumeParameter {
            key: "blockSize",
            value: "-".to_string(),
        }
        .into();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[test]
    fn require_rejects_empty_string() {
        let err = String::new().require("volume ID").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), "volume ID is required");
    }

    #[test]
    fn require_accepts_some() {
        let value = Some(5).require("field").unwrap();
        assert_eq!(value, 5);
    }
}
