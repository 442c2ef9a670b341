//! Build script for a3s-pod-cri
//!
//! Compiles the CRI v1 proto subset. The server stubs back the fake runtime
//! used by the integration tests.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .message_attribute(
            ".",
            "#[derive(serde::Serialize, serde::Deserialize)] #[serde(default)]",
        )
        .enum_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile(&["proto/api.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/api.proto");

    Ok(())
}
