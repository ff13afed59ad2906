fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Backend driver contract
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/bucket_driver.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/bucket_driver.proto");

    Ok(())
}
