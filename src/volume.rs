//! Volume context parsing and filesystem format options.
//!
//! Stage requests carry optional formatting hints in the volume context;
//! this module validates them against the requested filesystem and renders
//! the mkfs argument list.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub const FS_TYPE_EXT2: &str = "ext2";
pub const FS_TYPE_EXT3: &str = "ext3";
pub const FS_TYPE_EXT4: &str = "ext4";
pub const FS_TYPE_XFS: &str = "xfs";
pub const DEFAULT_FS_TYPE: &str = FS_TYPE_EXT4;

/// Publish-context key carrying the device path reported at attach time.
pub const DEVICE_PATH_KEY: &str = "devicePath";

/// Volume-context keys.
pub const BLOCK_SIZE_KEY: &str = "blockSize";
pub const INODE_SIZE_KEY: &str = "inodeSize";
pub const BYTES_PER_INODE_KEY: &str = "bytesPerInode";
pub const NUMBER_OF_INODES_KEY: &str = "numberOfInodes";
pub const EXT4_BIG_ALLOC_KEY: &str = "ext4BigAlloc";
pub const EXT4_CLUSTER_SIZE_KEY: &str = "ext4ClusterSize";
pub const PARTITION_KEY: &str = "partition";

pub fn is_supported_fs_type(fs_type: &str) -> bool {
    matches!(
        fs_type,
        FS_TYPE_EXT2 | FS_TYPE_EXT3 | FS_TYPE_EXT4 | FS_TYPE_XFS
    )
}

fn is_ext(fs_type: &str) -> bool {
    matches!(fs_type, FS_TYPE_EXT2 | FS_TYPE_EXT3 | FS_TYPE_EXT4)
}

/// Partition number from the volume context. Zero or absent means the whole
/// device.
pub fn partition(volume_context: &HashMap<String, String>) -> Result<u32> {
    match volume_context.get(PARTITION_KEY) {
        None => Ok(0),
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| Error::InvalidPartition(raw.clone())),
    }
}

/// Validated filesystem formatting hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatOptions {
    pub block_size: Option<u64>,
    pub inode_size: Option<u64>,
    pub bytes_per_inode: Option<u64>,
    pub number_of_inodes: Option<u64>,
    pub ext4_big_alloc: bool,
    pub ext4_cluster_size: Option<u64>,
}

impl FormatOptions {
    /// Parse formatting hints out of the volume context, rejecting values
    /// that do not apply to `fs_type`.
    pub fn from_volume_context(
        volume_context: &HashMap<String, String>,
        fs_type: &str,
    ) -> Result<Self> {
        let numeric = |key: &'static str| -> Result<Option<u64>> {
            match volume_context.get(key) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| Error::InvalidVolumeParameter {
                        key,
                        value: raw.clone(),
                    }),
            }
        };

        let ext_only = |key: &'static str| -> Result<Option<u64>> {
            let value = numeric(key)?;
            if value.is_some() && !is_ext(fs_type) {
                return Err(Error::InvalidVolumeParameter {
                    key,
                    value: volume_context[key].clone(),
                });
            }
            Ok(value)
        };

        let ext4_big_alloc = match volume_context.get(EXT4_BIG_ALLOC_KEY) {
            None => false,
            Some(raw) => raw
                .parse::<bool>()
                .map_err(|_| Error::InvalidVolumeParameter {
                    key: EXT4_BIG_ALLOC_KEY,
                    value: raw.clone(),
                })?,
        };
        if ext4_big_alloc && fs_type != FS_TYPE_EXT4 {
            return Err(Error::InvalidVolumeParameter {
                key: EXT4_BIG_ALLOC_KEY,
                value: volume_context[EXT4_BIG_ALLOC_KEY].clone(),
            });
        }

        let ext4_cluster_size = numeric(EXT4_CLUSTER_SIZE_KEY)?;
        if ext4_cluster_size.is_some() && (!ext4_big_alloc || fs_type != FS_TYPE_EXT4) {
            return Err(Error::InvalidVolumeParameter {
                key: EXT4_CLUSTER_SIZE_KEY,
                value: volume_context[EXT4_CLUSTER_SIZE_KEY].clone(),
            });
        }

        Ok(Self {
            block_size: numeric(BLOCK_SIZE_KEY)?,
            inode_size: numeric(INODE_SIZE_KEY)?,
            bytes_per_inode: ext_only(BYTES_PER_INODE_KEY)?,
            number_of_inodes: ext_only(NUMBER_OF_INODES_KEY)?,
            ext4_big_alloc,
            ext4_cluster_size,
        })
    }

    /// Extra mkfs arguments for `fs_type`. `legacy_xfs` pins the xfs feature
    /// set so volumes stay mountable on old kernels.
    pub fn mkfs_args(&self, fs_type: &str, legacy_xfs: bool) -> Vec<String> {
        let mut args = Vec::new();
        if is_ext(fs_type) {
            if let Some(size) = self.block_size {
                args.push("-b".to_string());
                args.push(size.to_string());
            }
            if let Some(size) = self.inode_size {
                args.push("-I".to_string());
                args.push(size.to_string());
            }
            if let Some(bytes) = self.bytes_per_inode {
                args.push("-i".to_string());
                args.push(bytes.to_string());
            }
            if let Some(inodes) = self.number_of_inodes {
                args.push("-N".to_string());
                args.push(inodes.to_string());
            }
            if self.ext4_big_alloc {
                args.push("-O".to_string());
                args.push("bigalloc".to_string());
            }
            if let Some(size) = self.ext4_cluster_size {
                args.push("-C".to_string());
                args.push(size.to_string());
            }
        } else if fs_type == FS_TYPE_XFS {
            if let Some(size) = self.block_size {
                args.push("-b".to_string());
                args.push(format!("size={size}"));
            }
            if let Some(size) = self.inode_size {
                args.push("-i".to_string());
                args.push(format!("size={size}"));
            }
            if legacy_xfs {
                args.push("-m".to_string());
                args.push("bigtime=0,inobtcount=0,reflink=0".to_string());
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn ext4_args_in_order() {
        let options = FormatOptions::from_volume_context(
            &ctx(&[
                (BLOCK_SIZE_KEY, "4096"),
                (INODE_SIZE_KEY, "512"),
                (BYTES_PER_INODE_KEY, "16384"),
                (NUMBER_OF_INODES_KEY, "1000000"),
                (EXT4_BIG_ALLOC_KEY, "true"),
                (EXT4_CLUSTER_SIZE_KEY, "65536"),
            ]),
            FS_TYPE_EXT4,
        )
        .unwrap();
        assert_eq!(
            options.mkfs_args(FS_TYPE_EXT4, false),
            vec![
                "-b", "4096", "-I", "512", "-i", "16384", "-N", "1000000", "-O", "bigalloc",
                "-C", "65536"
            ]
        );
    }

    #[test]
    fn xfs_args_use_key_value_form() {
        let options = FormatOptions::from_volume_context(
            &ctx(&[(BLOCK_SIZE_KEY, "4096"), (INODE_SIZE_KEY, "512")]),
            FS_TYPE_XFS,
        )
        .unwrap();
        assert_eq!(
            options.mkfs_args(FS_TYPE_XFS, false),
            vec!["-b", "size=4096", "-i", "size=512"]
        );
    }

    #[test]
    fn legacy_xfs_pins_features() {
        let options = FormatOptions::default();
        assert_eq!(
            options.mkfs_args(FS_TYPE_XFS, true),
            vec!["-m", "bigtime=0,inobtcount=0,reflink=0"]
        );
    }

    #[test]
    fn rejects_non_numeric_block_size() {
        let err =
            FormatOptions::from_volume_context(&ctx(&[(BLOCK_SIZE_KEY, "-")]), FS_TYPE_EXT4)
                .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidVolumeParameter {
                key: BLOCK_SIZE_KEY,
                ..
            }
        ));
    }

    #[test]
    fn rejects_inode_count_on_xfs() {
        let err = FormatOptions::from_volume_context(
            &ctx(&[(NUMBER_OF_INODES_KEY, "100")]),
            FS_TYPE_XFS,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidVolumeParameter { .. }));
    }

    #[test]
    fn rejects_big_alloc_outside_ext4() {
        let err = FormatOptions::from_volume_context(
            &ctx(&[(EXT4_BIG_ALLOC_KEY, "true")]),
            FS_TYPE_EXT3,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidVolumeParameter { .. }));
    }

    #[test]
    fn cluster_size_requires_big_alloc() {
        let err = FormatOptions::from_volume_context(
            &ctx(&[(EXT4_CLUSTER_SIZE_KEY, "16384")]),
            FS_TYPE_EXT4,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidVolumeParameter { .. }));
    }

    #[test]
    fn empty_context_yields_no_args() {
        let options = FormatOptions::from_volume_context(&ctx(&[]), FS_TYPE_EXT4).unwrap();
        assert!(options.mkfs_args(FS_TYPE_EXT4, false).is_empty());
    }

    #[test]
    fn partition_parsing() {
        assert_eq!(partition(&ctx(&[])).unwrap(), 0);
        assert_eq!(partition(&ctx(&[(PARTITION_KEY, "1")])).unwrap(), 1);
        assert!(matches!(
            partition(&ctx(&[(PARTITION_KEY, "-1")])),
            Err(Error::InvalidPartition(_))
        ));
        assert!(matches!(
            partition(&ctx(&[(PARTITION_KEY, "abc")])),
            Err(Error::InvalidPartition(_))
        ));
    }

    #[test]
    fn supported_fs_types() {
        for fs in [FS_TYPE_EXT2, FS_TYPE_EXT3, FS_TYPE_EXT4, FS_TYPE_XFS] {
            assert!(is_supported_fs_type(fs));
        }
        assert!(!is_supported_fs_type("ntfs"));
        assert!(!is_supported_fs_type(""));
    }
}
