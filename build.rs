fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto");

    // containerd task lookup + gRPC health (clients for the agent, servers for tests)
    tonic_build::configure().compile_protos(
        &[
            "proto/containerd/services/tasks/v1/tasks.proto",
            "proto/grpc/health/v1/health.proto",
        ],
        &["proto"],
    )?;

    Ok(())
}
