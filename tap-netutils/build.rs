fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().build_server(true).compile_protos(
        &[
            "proto/taprootassets.proto",
            "proto/universe.proto",
            "proto/mint.proto",
            "proto/assetwallet.proto",
        ],
        &["proto"],
    )?;
    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
