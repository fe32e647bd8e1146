fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc binary so no system installation is required.
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    // SAFETY: build scripts are single-threaded; nothing else reads the
    // environment concurrently.
    unsafe { std::env::set_var("PROTOC", protoc) };

    tonic_build::configure().compile_protos(&["proto/meta.proto"], &["proto/"])?;
    println!("cargo:rerun-if-changed=proto/meta.proto");
    Ok(())
}
