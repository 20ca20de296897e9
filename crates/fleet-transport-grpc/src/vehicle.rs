//! VehicleStore service implementation.
//!
//! Every RPC builds a transport-neutral context from its typed request and
//! runs the shared pipeline, so validation, entity tags and error classes
//! behave exactly as they do over REST.

use crate::proto::vehicle_store_server::VehicleStore;
use crate::proto::{DeleteVehicleResponse, ListVehiclesRequest, VehicleQuery, VehicleVin};
use crate::status::to_status;
use fleet_resource::{Payload, Pipeline, QueryParams, RequestContext, Resource, Tagged, Vehicle};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::AsciiMetadataValue;
use tonic::{Request, Response, Status};

/// Request metadata carrying the tag a mutation is conditional on.
pub const IF_MATCH: &str = "if-match";

/// Response metadata carrying the tag of the returned vehicle.
pub const ETAG: &str = "etag";

/// Buffered messages per streaming call.
const STREAM_BUFFER: usize = 16;

/// VehicleStore service over any resource whose value is a [`Vehicle`].
pub struct VehicleStoreService<R> {
    pipeline: Pipeline<R>,
}

impl<R: Resource<Value = Vehicle>> VehicleStoreService<R> {
    pub fn new(resource: Arc<R>) -> Self {
        Self {
            pipeline: Pipeline::new(resource),
        }
    }

    fn context(&self, vin: &str) -> Result<RequestContext, Status> {
        if vin.is_empty() {
            return Err(Status::invalid_argument("A vin is required"));
        }
        Ok(self.pipeline.resource().routes().context_for(vin))
    }
}

fn precondition<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn tagged_response(tagged: Tagged<Vehicle>) -> Response<Vehicle> {
    let mut response = Response::new(tagged.value);
    if let Some(etag) = tagged.etag {
        match etag.header_value().parse::<AsciiMetadataValue>() {
            Ok(value) => {
                response.metadata_mut().insert(ETAG, value);
            }
            Err(e) => tracing::warn!(error = %e, "etag is not valid metadata"),
        }
    }
    response
}

/// Stream `vehicles` one message at a time, stopping as soon as the client
/// goes away.
///
/// The producer task resolves to the number of vehicles handed to the
/// channel.
fn stream_vehicles(
    vehicles: Vec<Vehicle>,
) -> (ReceiverStream<Result<Vehicle, Status>>, JoinHandle<usize>) {
    let (tx, rx) = tokio::sync::mpsc::channel(STREAM_BUFFER);
    let producer = tokio::spawn(async move {
        let total = vehicles.len();
        let mut sent = 0;
        for vehicle in vehicles {
            if tx.send(Ok(vehicle)).await.is_err() {
                tracing::debug!(sent, total, "client disconnected, aborting vehicle stream");
                return sent;
            }
            sent += 1;
        }
        sent
    });
    (ReceiverStream::new(rx), producer)
}

#[tonic::async_trait]
impl<R: Resource<Value = Vehicle>> VehicleStore for VehicleStoreService<R> {
    async fn get_vehicle(
        &self,
        request: Request<VehicleVin>,
    ) -> Result<Response<Vehicle>, Status> {
        let req = request.into_inner();
        tracing::debug!(vin = %req.vin, "GetVehicle");

        let ctx = self.context(&req.vin)?;
        let tagged = self.pipeline.fetch(&ctx).await.map_err(to_status)?;
        Ok(tagged_response(tagged))
    }

    async fn create_vehicle(
        &self,
        request: Request<Vehicle>,
    ) -> Result<Response<Vehicle>, Status> {
        let vehicle = request.into_inner();
        tracing::debug!(vin = %vehicle.vin, "CreateVehicle");

        let tagged = self
            .pipeline
            .create(Payload::Decoded(vehicle))
            .await
            .map_err(to_status)?;
        Ok(tagged_response(tagged))
    }

    async fn update_vehicle(
        &self,
        request: Request<Vehicle>,
    ) -> Result<Response<Vehicle>, Status> {
        let precondition = precondition(&request);
        let vehicle = request.into_inner();
        tracing::debug!(vin = %vehicle.vin, if_match = ?precondition, "UpdateVehicle");

        let ctx = self.context(&vehicle.vin)?;
        let tagged = self
            .pipeline
            .update(Payload::Decoded(vehicle), &ctx, precondition.as_deref())
            .await
            .map_err(to_status)?;
        Ok(tagged_response(tagged))
    }

    async fn delete_vehicle(
        &self,
        request: Request<VehicleVin>,
    ) -> Result<Response<DeleteVehicleResponse>, Status> {
        let precondition = precondition(&request);
        let req = request.into_inner();
        tracing::debug!(vin = %req.vin, if_match = ?precondition, "DeleteVehicle");

        let ctx = self.context(&req.vin)?;
        self.pipeline
            .delete(&ctx, precondition.as_deref())
            .await
            .map_err(to_status)?;
        Ok(Response::new(DeleteVehicleResponse {}))
    }

    type ListVehiclesStream = ReceiverStream<Result<Vehicle, Status>>;

    async fn list_vehicles(
        &self,
        _request: Request<ListVehiclesRequest>,
    ) -> Result<Response<Self::ListVehiclesStream>, Status> {
        tracing::debug!("ListVehicles");
        let vehicles = self.pipeline.resource().list().await.map_err(to_status)?;
        let (stream, _producer) = stream_vehicles(vehicles);
        Ok(Response::new(stream))
    }

    type SearchVehiclesStream = ReceiverStream<Result<Vehicle, Status>>;

    async fn search_vehicles(
        &self,
        request: Request<VehicleQuery>,
    ) -> Result<Response<Self::SearchVehiclesStream>, Status> {
        let req = request.into_inner();
        tracing::debug!(query = %req.query, "SearchVehicles");

        let query = QueryParams::parse(&req.query);
        let vehicles = self
            .pipeline
            .resource()
            .search(&query)
            .await
            .map_err(to_status)?;
        let (stream, _producer) = stream_vehicles(vehicles);
        Ok(Response::new(stream))
    }
}
