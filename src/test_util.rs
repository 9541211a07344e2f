//! Shared test fixtures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::driver::{Config, DriverState};
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::metadata::InstanceMetadata;
use crate::mounter::{FsStats, Mounter, MOUNT_OPTIONS_MAX};
use crate::node::NodeService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountCall {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fs_type: Option<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCall {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
    pub mkfs_args: Vec<String>,
}

/// In-memory [`Mounter`] that records every call and serves canned state.
#[derive(Default)]
pub struct FakeMounter {
    paths: Mutex<HashSet<PathBuf>>,
    scan_queue: Mutex<VecDeque<Option<PathBuf>>>,
    scans: Mutex<usize>,
    mounts_by_point: Mutex<HashMap<PathBuf, (String, usize)>>,
    block_devices: Mutex<HashSet<PathBuf>>,
    block_sizes: Mutex<HashMap<PathBuf, i64>>,
    stats: Mutex<Option<FsStats>>,
    needs_resize: Mutex<bool>,
    fail_path_exists: Mutex<bool>,
    fail_block_device_check: Mutex<bool>,

    pub mount_calls: Mutex<Vec<MountCall>>,
    pub format_calls: Mutex<Vec<FormatCall>>,
    pub unmount_calls: Mutex<Vec<PathBuf>>,
    pub resize_calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path(&self, path: impl Into<PathBuf>) {
        self.paths.lock().unwrap().insert(path.into());
    }

    pub fn queue_scan(&self, result: Option<PathBuf>) {
        self.scan_queue.lock().unwrap().push_back(result);
    }

    pub fn scan_count(&self) -> usize {
        *self.scans.lock().unwrap()
    }

    pub fn set_mounted(&self, mount_point: impl Into<PathBuf>, device: &str, refcount: usize) {
        let mount_point = mount_point.into();
        self.paths.lock().unwrap().insert(mount_point.clone());
        self.mounts_by_point
            .lock()
            .unwrap()
            .insert(mount_point, (device.to_string(), refcount));
    }

    pub fn set_block_device(&self, path: impl Into<PathBuf>, size: i64) {
        let path = path.into();
        self.paths.lock().unwrap().insert(path.clone());
        self.block_devices.lock().unwrap().insert(path.clone());
        self.block_sizes.lock().unwrap().insert(path, size);
    }

    pub fn set_stats(&self, stats: FsStats) {
        *self.stats.lock().unwrap() = Some(stats);
    }

    pub fn set_needs_resize(&self, needs: bool) {
        *self.needs_resize.lock().unwrap() = needs;
    }

    pub fn set_path_exists_failure(&self, fail: bool) {
        *self.fail_path_exists.lock().unwrap() = fail;
    }

    pub fn set_block_device_check_failure(&self, fail: bool) {
        *self.fail_block_device_check.lock().unwrap() = fail;
    }

    fn stat_error(path: &Path) -> Error {
        Error::Stat {
            path: path.display().to_string(),
            source: std::io::Error::from_raw_os_error(13),
        }
    }
}

#[tonic::async_trait]
impl Mounter for FakeMounter {
    async fn path_exists(&self, path: &Path) -> Result<bool> {
        if *self.fail_path_exists.lock().unwrap() {
            return Err(Self::stat_error(path));
        }
        Ok(self.paths.lock().unwrap().contains(path))
    }

    async fn make_dir(&self, path: &Path) -> Result<()> {
        self.paths.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn make_file(&self, path: &Path) -> Result<()> {
        self.paths.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn scan_device(
        &self,
        hint: &Path,
        _volume_id: &str,
        _region: &str,
    ) -> Result<Option<PathBuf>> {
        *self.scans.lock().unwrap() += 1;
        if let Some(queued) = self.scan_queue.lock().unwrap().pop_front() {
            return Ok(queued);
        }
        if self.paths.lock().unwrap().contains(hint) {
            Ok(Some(hint.to_path_buf()))
        } else {
            Ok(None)
        }
    }

    async fn device_name_from_mount(&self, mount_point: &Path) -> Result<Option<(String, usize)>> {
        Ok(self.mounts_by_point.lock().unwrap().get(mount_point).cloned())
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
        self.mount_calls.lock().unwrap().push(MountCall {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.map(String::from),
            options: options.to_vec(),
        });
        self.set_mounted(target, &source.display().to_string(), 1);
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        self.unmount_calls.lock().unwrap().push(target.to_path_buf());
        self.mounts_by_point.lock().unwrap().remove(target);
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
        self.format_calls.lock().unwrap().push(FormatCall {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.to_string(),
            options: options.to_vec(),
            mkfs_args: mkfs_args.to_vec(),
        });
        self.set_mounted(target, &source.display().to_string(), 1);
        Ok(())
    }

    async fn needs_resize(&self, _device: &Path, _mount_path: &Path) -> Result<bool> {
        Ok(*self.needs_resize.lock().unwrap())
    }

    async fn resize(&self, device: &Path, mount_path: &Path) -> Result<()> {
        self.resize_calls
            .lock()
            .unwrap()
            .push((device.to_path_buf(), mount_path.to_path_buf()));
        Ok(())
    }

    async fn is_block_device(&self, path: &Path) -> Result<bool> {
        if *self.fail_block_device_check.lock().unwrap() {
            return Err(Self::stat_error(path));
        }
        Ok(self.block_devices.lock().unwrap().contains(path))
    }

    async fn block_size_bytes(&self, path: &Path) -> Result<i64> {
        self.block_sizes
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .ok_or_else(|| Error::PathNotFound(path.display().to_string()))
    }

    async fn volume_stats(&self, path: &Path) -> Result<FsStats> {
        self.stats
            .lock()
            .unwrap()
            .ok_or_else(|| Error::PathNotFound(path.display().to_string()))
    }
}

/// Driver state wired to a [`FakeMounter`] and a fixed metadata snapshot.
pub struct TestFixture {
    pub mounter: Arc<FakeMounter>,
    pub state: Arc<DriverState>,
}

impl TestFixture {
    pub fn new() -> Self {
        let mounter = Arc::new(FakeMounter::new());
        let metadata = Arc::new(InstanceMetadata {
            region: "us-west-2".to_string(),
            availability_zone: "us-west-2b".to_string(),
            instance_id: "i-1234567890abcdef0".to_string(),
            instance_type: "m5.large".to_string(),
            num_attached_enis: 1,
            ..Default::default()
        });
        let config = Config {
            node_id: "test-node".to_string(),
            ..Default::default()
        };
        let state = Arc::new(DriverState::new(config, mounter.clone(), metadata));
        Self { mounter, state }
    }

    pub fn node_service(&self) -> NodeService {
        NodeService::new(self.state.clone())
    }

    pub fn identity_service(&self) -> IdentityService {
        IdentityService::new(self.state.clone())
    }
}
