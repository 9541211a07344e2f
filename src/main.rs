//! ebs-csi: CSI node driver for cloud block volumes.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ebs_csi::metadata::EnvMetadata;
use ebs_csi::{Config, Driver, SystemMounter};

#[derive(Parser, Debug)]
#[command(name = "ebs-csi")]
#[command(about = "CSI node driver for cloud block volumes")]
struct Args {
    /// CSI endpoint (unix:// or tcp://).
    #[arg(long, default_value = "unix:///var/run/csi/csi.sock")]
    endpoint: String,

    /// Node ID, defaults to the hostname.
    #[arg(long)]
    node_id: Option<String>,

    /// Fixed volume attach limit; negative means calculate from the
    /// instance type.
    #[arg(long, default_value = "-1")]
    volume_attach_limit: i64,

    /// Attachment slots held back for non-CSI volumes; -1 derives the
    /// reservation from the instance's block device mappings.
    #[arg(long, default_value = "-1")]
    reserved_volume_attachments: i64,

    /// Format xfs volumes with a feature set old kernels can mount.
    #[arg(long)]
    legacy_xfs: bool,

    /// Verbosity level (0-4).
    #[arg(short, default_value = "0")]
    v: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Use targeted filters to avoid verbose logs from dependencies (h2, tonic, hyper).
    // Only this crate gets detailed logging; everything else stays at warn.
    let filter = match args.v {
        0 => "warn".to_string(),
        1 => "ebs_csi=info,warn".to_string(),
        2 => "ebs_csi=debug,warn".to_string(),
        3 => "ebs_csi=trace,warn".to_string(),
        _ => "ebs_csi=trace,info".to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = Config {
        endpoint: args.endpoint,
        node_id: args.node_id.unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        }),
        volume_attach_limit: args.volume_attach_limit,
        reserved_volume_attachments: args.reserved_volume_attachments,
        legacy_xfs: args.legacy_xfs,
        ..Default::default()
    };

    info!(
        name = %config.name,
        version = %config.version,
        node_id = %config.node_id,
        endpoint = %config.endpoint,
        "starting CSI node driver"
    );

    let metadata = Arc::new(EnvMetadata::load(&config.node_id));
    let mounter = Arc::new(SystemMounter::new());
    let driver = Driver::new(config, mounter, metadata)?;
    driver.run().await?;

    Ok(())
}
