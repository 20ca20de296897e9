//! gRPC transport for fleet resources.
//!
//! Implements the `fleet.v1.VehicleStore` service defined in
//! `proto/fleet.proto` on top of the shared request pipeline.

pub mod proto {
    //! Generated protobuf types and service traits.
    tonic::include_proto!("fleet.v1");
}

pub mod server;
pub mod status;
pub mod vehicle;

pub use server::{GrpcServer, GrpcServerError};
pub use vehicle::VehicleStoreService;
