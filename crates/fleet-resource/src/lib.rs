//! Resource contract and request pipeline for the fleet services.
//!
//! A domain entity implements [`Resource`] once. The [`Pipeline`] wraps it
//! with body negotiation, validation and the entity-tag protocol, and the
//! transports (REST in `fleet-server`, gRPC in `fleet-transport-grpc`) drive
//! the pipeline.
//!
//! - [`encoding`]: media types and body negotiation
//! - [`etag`]: entity-tag derivation and comparison
//! - [`store`] / [`memory`]: the storage collaborator
//! - [`vehicle`]: the vehicle resource

pub mod context;
pub mod encoding;
pub mod error;
pub mod etag;
pub mod memory;
pub mod pipeline;
pub mod resource;
pub mod store;
pub mod vehicle;

pub use context::{QueryParams, RequestContext};
pub use encoding::{EncodingRegistry, MediaType};
pub use error::{ErrorKind, ErrorResponse, ResourceError, Result};
pub use etag::ETag;
pub use memory::MemoryStore;
pub use pipeline::{Conditional, Payload, Pipeline, Tagged};
pub use resource::{Operation, Resource, RouteBinding};
pub use store::{Store, StoreError};
pub use vehicle::{StoredVehicle, Vehicle, VehicleList};
