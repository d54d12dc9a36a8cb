use std::io::Result;

fn main() -> Result<()> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/nebula.proto"], &["proto"])?;
    Ok(())
}
