//! Device path resolution.
//!
//! Attach is asynchronous: the control plane reports a device path before the
//! kernel has surfaced the device, and on nitro hardware the device appears
//! under an NVMe name unrelated to the hint. The resolver polls with bounded
//! backoff until the device (and requested partition) exists or the deadline
//! passes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mounter::Mounter;

const RESOLVE_INITIAL_DELAY: Duration = Duration::from_millis(100);
const RESOLVE_BACKOFF_FACTOR: u32 = 2;
const RESOLVE_MAX_DELAY: Duration = Duration::from_secs(2);
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(12);

/// Append a partition suffix. NVMe device nodes take a `p` separator.
pub fn with_partition(device: &Path, partition: u32) -> PathBuf {
    if partition == 0 {
        return device.to_path_buf();
    }
    let name = device.display().to_string();
    if name.contains("nvme") {
        PathBuf::from(format!("{name}p{partition}"))
    } else {
        PathBuf::from(format!("{name}{partition}"))
    }
}

/// Resolve the hinted device path to a device node present on this host,
/// waiting out attach latency. Fails with `DeviceNotFound` after the
/// deadline.
pub async fn resolve(
    mounter: &dyn Mounter,
    hint: &str,
    volume_id: &str,
    partition: u32,
    region: &str,
) -> Result<PathBuf> {
    let hint_path = Path::new(hint);
    let start = Instant::now();
    let mut delay = RESOLVE_INITIAL_DELAY;
    let mut last_error = "device has not appeared".to_string();

    loop {
        match mounter.scan_device(hint_path, volume_id, region).await {
            Ok(Some(device)) => {
                let device = with_partition(&device, partition);
                if partition == 0 {
                    debug!(volume_id, device = %device.display(), "resolved device");
                    return Ok(device);
                }
                match mounter.path_exists(&device).await {
                    Ok(true) => {
                        debug!(volume_id, device = %device.display(), "resolved device");
                        return Ok(device);
                    }
                    Ok(false) => {
                        last_error =
                            format!("partition {partition} missing on {}", device.display());
                    }
                    Err(e) => {
                        last_error = e.to_string();
                    }
                }
            }
            Ok(None) => {
                last_error = "device has not appeared".to_string();
            }
            Err(e) => {
                last_error = e.to_string();
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= RESOLVE_TIMEOUT {
            return Err(Error::DeviceNotFound {
                device: hint.to_string(),
                waited_ms: elapsed.as_millis() as u64,
                last_error,
            });
        }
        debug!(volume_id, ?delay, "device not ready, retrying");
        tokio::time::sleep(delay).await;
        delay = (delay * RESOLVE_BACKOFF_FACTOR).min(RESOLVE_MAX_DELAY);
    }
}
