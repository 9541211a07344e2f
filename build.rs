use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("proto");
    let descriptor = PathBuf::from(std::env::var("OUT_DIR")?).join("ebs_csi_descriptor.bin");

    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path(descriptor)
        .compile_protos(&[proto_dir.join("csi.proto")], &[proto_dir])?;
    Ok(())
}
