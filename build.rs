fn main() -> std::io::Result<()> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path().expect("bundled protoc binary"),
    );
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/cache.proto"], &["proto/"])?;
    Ok(())
}
