//! Build script to compile protobuf definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Vehicle and ErrorResponse are shared with the REST encodings, so the
    // generated code refers to the fleet-resource types instead of its own.
    tonic_build::configure()
        .extern_path(".fleet.v1.Vehicle", "::fleet_resource::vehicle::Vehicle")
        .extern_path(
            ".fleet.v1.ErrorResponse",
            "::fleet_resource::error::ErrorResponse",
        )
        .compile_protos(&["proto/fleet.proto"], &["proto"])?;
    Ok(())
}
