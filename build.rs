fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().compile(&["info.proto", "v1alpha2.proto"], &["./protos"])?;

    Ok(())
}
