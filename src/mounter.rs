//! Filesystem and device operations behind the node service.
//!
//! Everything that touches the host (mount table, block devices, mkfs and
//! resize tools) goes through the [`Mounter`] trait so the gRPC handlers
//! stay testable. [`SystemMounter`] is the production implementation and
//! shells out to the standard Linux tools from blocking tasks.

use std::path::{Path, PathBuf};
use std::process::Command;

use tokio::task;
use tracing::debug;

use crate::error::{Error, Result};

/// Upper bound on mount options accepted from a request, so a caller cannot
/// blow up the mount argv.
pub const MOUNT_OPTIONS_MAX: usize = 64;

/// Pseudo-region of Snowball Edge hosts.
const SNOW_REGION: &str = "snow";

/// Filesystem usage snapshot for NodeGetVolumeStats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    pub available_bytes: i64,
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub available_inodes: i64,
    pub total_inodes: i64,
    pub used_inodes: i64,
}

/// Host-side volume plumbing.
#[tonic::async_trait]
pub trait Mounter: Send + Sync {
    async fn path_exists(&self, path: &Path) -> Result<bool>;

    /// Create a directory and any missing parents. Succeeds if it already
    /// exists.
    async fn make_dir(&self, path: &Path) -> Result<()>;

    /// Create an empty file for block bind mounts. Succeeds if it already
    /// exists.
    async fn make_file(&self, path: &Path) -> Result<()>;

    /// One enumeration pass looking for the attached device: the hinted path
    /// if present, otherwise the NVMe by-id link derived from the volume ID.
    /// `region` disambiguates edge hosts whose devices never get NVMe names.
    /// Returns None when the device has not surfaced yet.
    async fn scan_device(&self, hint: &Path, volume_id: &str, region: &str)
        -> Result<Option<PathBuf>>;

    /// Device backing `mount_point` and how many mount table entries share
    /// that device. None when nothing is mounted there.
    async fn device_name_from_mount(&self, mount_point: &Path) -> Result<Option<(String, usize)>>;

    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<&str>,
        options: &[String],
    ) -> Result<()>;

    async fn unmount(&self, target: &Path) -> Result<()>;

    /// Format `source` with `fs_type` if it carries no filesystem yet, then
    /// mount it. A pre-formatted device is mounted as-is, never reformatted.
    async fn format_and_mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
        mkfs_args: &[String],
    ) -> Result<()>;

    /// Whether the filesystem on `device` is smaller than the device itself.
    async fn needs_resize(&self, device: &Path, mount_path: &Path) -> Result<bool>;

    /// Grow the filesystem on `device` to fill it.
    async fn resize(&self, device: &Path, mount_path: &Path) -> Result<()>;

    async fn is_block_device(&self, path: &Path) -> Result<bool>;

    /// Size of the block device in bytes.
    async fn block_size_bytes(&self, path: &Path) -> Result<i64>;

    async fn volume_stats(&self, path: &Path) -> Result<FsStats>;
}

/// Production mounter. Command invocations run on the blocking pool.
#[derive(Debug, Default)]
pub struct SystemMounter;

impl SystemMounter {
    pub fn new() -> Self {
        Self
    }

    async fn run(program: &'static str, args: Vec<String>) -> Result<String> {
        task::spawn_blocking(move || {
            debug!(%program, ?args, "running command");
            let output = Command::new(program).args(&args).output()?;
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                Err(Error::Io(std::io::Error::other(format!(
                    "{program} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ))))
            }
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Filesystem currently on the device, per blkid. Empty string for a
    /// blank device.
    async fn detect_fs(device: &Path) -> Result<String> {
        let args = vec![
            "-p".to_string(),
            "-s".to_string(),
            "TYPE".to_string(),
            "-o".to_string(),
            "value".to_string(),
            device.display().to_string(),
        ];
        // blkid exits non-zero on a blank device; treat that as no filesystem.
        match Self::run("blkid", args).await {
            Ok(fs_type) => Ok(fs_type),
            Err(_) => Ok(String::new()),
        }
    }

    fn parse_mounts(contents: &str) -> Vec<(String, String)> {
        contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = fields.next()?;
                let mount_point = fields.next()?;
                // The kernel escapes spaces in mount points as \040.
                Some((device.to_string(), mount_point.replace("\\040", " ")))
            })
            .collect()
    }

    fn nvme_link(volume_id: &str) -> PathBuf {
        let serial = volume_id.replace('-', "");
        PathBuf::from(format!(
            "/dev/disk/by-id/nvme-Amazon_Elastic_Block_Store_{serial}"
        ))
    }
}

#[tonic::async_trait]
impl Mounter for SystemMounter {
    async fn path_exists(&self, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || match std::fs::metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Stat {
                path: path.display().to_string(),
                source: e,
            }),
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn make_dir(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || Ok(std::fs::create_dir_all(path)?))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn make_file(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn scan_device(
        &self,
        hint: &Path,
        volume_id: &str,
        region: &str,
    ) -> Result<Option<PathBuf>> {
        if self.path_exists(hint).await? {
            return Ok(Some(hint.to_path_buf()));
        }
        // Snowball Edge hosts expose devices under the hinted name only;
        // there is no NVMe by-id link to fall back on.
        if region == SNOW_REGION {
            return Ok(None);
        }
        let link = Self::nvme_link(volume_id);
        let resolved = task::spawn_blocking(move || match std::fs::canonicalize(&link) {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Stat {
                path: link.display().to_string(),
                source: e,
            }),
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(resolved)
    }

    async fn device_name_from_mount(&self, mount_point: &Path) -> Result<Option<(String, usize)>> {
        let mount_point = mount_point.to_path_buf();
        task::spawn_blocking(move || {
            let contents = std::fs::read_to_string("/proc/mounts")?;
            let mounts = Self::parse_mounts(&contents);
            let wanted = mount_point.display().to_string();
            let device = mounts
                .iter()
                .find(|(_, point)| *point == wanted)
                .map(|(device, _)| device.clone());
            Ok(device.map(|device| {
                let refcount = mounts.iter().filter(|(d, _)| *d == device).count();
                (device, refcount)
            }))
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: Option<&str>,
        options: &[String],
    ) -> Result<()> {
        if options.len() > MOUNT_OPTIONS_MAX {
            return Err(Error::TooManyMountOptions {
                count: options.len(),
                max: MOUNT_OPTIONS_MAX,
            });
        }
        let mut args = Vec::new();
        if let Some(fs_type) = fs_type {
            args.push("-t".to_string());
            args.push(fs_type.to_string());
        }
        if !options.is_empty() {
            args.push("-o".to_string());
            args.push(options.join(","));
        }
        args.push(source.display().to_string());
        args.push(target.display().to_string());
        Self::run("mount", args).await.map_err(|e| Error::Mount {
            mount_source: source.display().to_string(),
            target: target.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        Self::run("umount", vec![target.display().to_string()])
            .await
            .map_err(|e| Error::Unmount {
                target: target.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;
        Ok(())
    }

    async fn format_and_mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
        mkfs_args: &[String],
    ) -> Result<()> {
        let existing = Self::detect_fs(source).await?;
        if existing.is_empty() {
            let program: &'static str = match fs_type {
                "ext2" => "mkfs.ext2",
                "ext3" => "mkfs.ext3",
                "ext4" => "mkfs.ext4",
                "xfs" => "mkfs.xfs",
                other => return Err(Error::UnsupportedFsType(other.to_string())),
            };
            let mut args = mkfs_args.to_vec();
            args.push(source.display().to_string());
            Self::run(program, args).await.map_err(|e| Error::Format {
                device: source.display().to_string(),
                fs_type: fs_type.to_string(),
                message: e.to_string(),
            })?;
        } else {
            debug!(device = %source.display(), fs = %existing, "device already formatted");
        }
        self.mount(source, target, Some(fs_type), options).await
    }

    async fn needs_resize(&self, device: &Path, mount_path: &Path) -> Result<bool> {
        let device_size = self.block_size_bytes(device).await?;
        let stats = self.volume_stats(mount_path).await?;
        // Filesystem overhead means the mounted size never matches the device
        // exactly; only a full missing gigabyte counts as resizable.
        const SLACK: i64 = 1 << 30;
        Ok(device_size >= stats.total_bytes + SLACK)
    }

    async fn resize(&self, device: &Path, mount_path: &Path) -> Result<()> {
        let fs_type = Self::detect_fs(device).await?;
        let result = match fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => {
                Self::run("resize2fs", vec![device.display().to_string()]).await
            }
            "xfs" => {
                Self::run(
                    "xfs_growfs",
                    vec!["-d".to_string(), mount_path.display().to_string()],
                )
                .await
            }
            other => {
                return Err(Error::Resize {
                    device: device.display().to_string(),
                    path: mount_path.display().to_string(),
                    message: format!("unsupported filesystem {other:?}"),
                })
            }
        };
        result.map_err(|e| Error::Resize {
            device: device.display().to_string(),
            path: mount_path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn is_block_device(&self, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || {
            let stat = nix::sys::stat::stat(&path).map_err(|e| Error::Stat {
                path: path.display().to_string(),
                source: std::io::Error::from(e),
            })?;
            let mode = nix::sys::stat::SFlag::from_bits_truncate(stat.st_mode);
            Ok(mode.contains(nix::sys::stat::SFlag::S_IFBLK))
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    async fn block_size_bytes(&self, path: &Path) -> Result<i64> {
        let output = Self::run(
            "blockdev",
            vec!["--getsize64".to_string(), path.display().to_string()],
        )
        .await?;
        output
            .parse::<i64>()
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    async fn volume_stats(&self, path: &Path) -> Result<FsStats> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || {
            let vfs = nix::sys::statvfs::statvfs(&path).map_err(|e| Error::Stat {
                path: path.display().to_string(),
                source: std::io::Error::from(e),
            })?;
            let frsize = vfs.fragment_size() as i64;
            let total = vfs.blocks() as i64 * frsize;
            let available = vfs.blocks_available() as i64 * frsize;
            let used = (vfs.blocks() - vfs.blocks_free()) as i64 * frsize;
            Ok(FsStats {
                available_bytes: available,
                total_bytes: total,
                used_bytes: used,
                available_inodes: vfs.files_available() as i64,
                total_inodes: vfs.files() as i64,
                used_inodes: (vfs.files() - vfs.files_free()) as i64,
            })
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}
