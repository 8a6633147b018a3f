//! Generated containerd and gRPC health bindings (see `build.rs` and `proto/`)
//!
//! Modules are nested by protobuf package so that prost's relative paths
//! between packages (`GetResponse.process` → `containerd.v1.types.Process`)
//! resolve.

pub mod containerd {
    pub mod v1 {
        pub mod types {
            tonic::include_proto!("containerd.v1.types");
        }
    }

    pub mod services {
        pub mod tasks {
            pub mod v1 {
                tonic::include_proto!("containerd.services.tasks.v1");
            }
        }
    }
}

pub mod health {
    tonic::include_proto!("grpc.health.v1");
}

pub use containerd::services::tasks::v1::{tasks_client::TasksClient, GetRequest, GetResponse};
pub use containerd::v1::types::Process;
pub use health::health_check_response::ServingStatus;
pub use health::{health_client::HealthClient, HealthCheckRequest, HealthCheckResponse};
