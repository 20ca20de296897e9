//! Vehicle resource: the reference [`Resource`] implementation.
//!
//! `Vehicle` doubles as the protobuf wire message, so the gRPC transport and
//! the `application/x-protobuf` REST encoding share one type with the JSON,
//! XML and YAML encodings.

use crate::context::{QueryParams, RequestContext};
use crate::encoding::{EncodingError, EncodingRegistry, MediaType};
use crate::error::{ResourceError, Result};
use crate::etag::ETag;
use crate::resource::{Operation, Resource, RouteBinding};
use crate::store::{Filter, Row, Store, StoreError, TableSchema};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Path variable carrying the VIN.
pub const VIN: &str = "vin";

/// Attributes accepted as search keys.
pub const SEARCHABLE: &[&str] = &["make", "model", "year", "exterior_color", "interior_color"];

pub const VEHICLES: TableSchema = TableSchema {
    table: "vehicles",
    key_column: "vin",
    columns: &[
        "make",
        "model",
        "year",
        "exterior_color",
        "interior_color",
        "updated_at",
    ],
};

/// One vehicle record.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(default, rename = "vehicle")]
pub struct Vehicle {
    #[prost(string, tag = "1")]
    pub vin: String,
    #[prost(string, tag = "2")]
    pub make: String,
    #[prost(string, tag = "3")]
    pub model: String,
    #[prost(int32, tag = "4")]
    pub year: i32,
    #[prost(string, tag = "5")]
    pub exterior_color: String,
    #[prost(string, tag = "6")]
    pub interior_color: String,
    /// Unix milliseconds of the last successful create/update.
    #[prost(int64, tag = "7")]
    pub updated_at: i64,
}

/// Framing for a list of vehicles in encodings that need a single root:
/// protobuf, and XML as `<vehicles><vehicle>..</vehicle>..</vehicles>`.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(rename = "vehicles")]
pub struct VehicleList {
    #[prost(message, repeated, tag = "1")]
    #[serde(rename = "vehicle", default)]
    pub vehicles: Vec<Vehicle>,
}

impl Row for Vehicle {
    fn key(&self) -> &str {
        &self.vin
    }

    fn marker(&self) -> i64 {
        self.updated_at
    }

    fn set_marker(&mut self, marker: i64) {
        self.updated_at = marker;
    }

    fn column(&self, name: &str) -> Option<String> {
        match name {
            "vin" => Some(self.vin.clone()),
            "make" => Some(self.make.clone()),
            "model" => Some(self.model.clone()),
            "year" => Some(self.year.to_string()),
            "exterior_color" => Some(self.exterior_color.clone()),
            "interior_color" => Some(self.interior_color.clone()),
            "updated_at" => Some(self.updated_at.to_string()),
            _ => None,
        }
    }
}

/// Source of modification markers.
///
/// Yields unix milliseconds, bumped by one when the wall clock has not moved
/// (or moved backwards) since the previous marker, so consecutive mutations
/// always get distinct markers.
#[derive(Debug, Default)]
pub struct MarkerClock {
    last: AtomicI64,
}

impl MarkerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(previous + 1);
            match self.last.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}

/// Vehicles kept in a [`Store`].
pub struct StoredVehicle {
    store: Arc<dyn Store<Vehicle>>,
    encodings: EncodingRegistry,
    clock: MarkerClock,
}

impl StoredVehicle {
    pub fn new(store: Arc<dyn Store<Vehicle>>) -> Self {
        Self::with_encodings(store, EncodingRegistry::default())
    }

    pub fn with_encodings(store: Arc<dyn Store<Vehicle>>, encodings: EncodingRegistry) -> Self {
        Self {
            store,
            encodings,
            clock: MarkerClock::new(),
        }
    }

    /// Marker for a write replacing a row marked `previous`. Never at or
    /// below `previous`, even if another instance's clock is ahead of ours.
    fn stamp(&self, previous: Option<i64>) -> i64 {
        let next = self.clock.next();
        previous.map_or(next, |p| next.max(p + 1))
    }

    fn vin<'a>(&self, ctx: &'a RequestContext) -> Result<&'a str> {
        match ctx.var(VIN) {
            Some(vin) if !vin.is_empty() => Ok(vin),
            _ => Err(ResourceError::invalid_input("A vin is required")),
        }
    }
}

/// Classify a store failure for the vehicle identified by `vin`.
fn classify(err: StoreError, vin: &str) -> ResourceError {
    match err {
        StoreError::NoRows => {
            ResourceError::not_found(format!("Vehicle with VIN {} doesn't exist", vin))
        }
        StoreError::UniqueViolation { .. } => {
            ResourceError::conflict(format!("Vehicle with VIN {} already exists", vin))
        }
        other => {
            tracing::error!(vin, error = %other, "store error");
            ResourceError::internal(other.to_string())
        }
    }
}

fn encoding_failure(err: EncodingError) -> ResourceError {
    match err {
        EncodingError::Unsupported(media) => {
            ResourceError::unsupported_media_type(format!("No such encoding: {}", media))
        }
        other => ResourceError::internal(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Resource for StoredVehicle {
    type Value = Vehicle;

    async fn create_schema(&self) -> Result<()> {
        self.store
            .create_table(&VEHICLES)
            .await
            .map_err(|e| ResourceError::internal(e.to_string()))
    }

    fn routes(&self) -> RouteBinding {
        RouteBinding {
            collection: "vehicles",
            identity_var: VIN,
        }
    }

    fn identity<'a>(&self, value: &'a Vehicle) -> Option<&'a str> {
        Some(value.vin.as_str()).filter(|vin| !vin.is_empty())
    }

    fn validate(&self, vehicle: &Vehicle, operation: Operation) -> Result<()> {
        if vehicle.vin.is_empty() && operation != Operation::Update {
            return Err(ResourceError::invalid_input("A vin is required"));
        }
        if vehicle.make.is_empty() {
            return Err(ResourceError::invalid_input("A make is required"));
        }
        if vehicle.model.is_empty() {
            return Err(ResourceError::invalid_input("A model is required"));
        }
        if vehicle.year == 0 {
            return Err(ResourceError::invalid_input("A year is required"));
        }
        if vehicle.exterior_color.is_empty() {
            return Err(ResourceError::invalid_input("An exterior_color is required"));
        }
        if vehicle.interior_color.is_empty() {
            return Err(ResourceError::invalid_input("An interior_color is required"));
        }
        Ok(())
    }

    fn encodings(&self) -> &EncodingRegistry {
        &self.encodings
    }

    fn unmarshal(&self, media: MediaType, data: &[u8]) -> Result<Vehicle> {
        if !self.encodings.supports(media) {
            return Err(encoding_failure(EncodingError::Unsupported(media)));
        }
        if media == MediaType::Protobuf {
            return Vehicle::decode(data).map_err(|e| ResourceError::invalid_input(e.to_string()));
        }
        self.encodings.unmarshal(media, data).map_err(|e| {
            if e.is_malformed() {
                ResourceError::invalid_input(e.to_string())
            } else {
                encoding_failure(e)
            }
        })
    }

    fn marshal(&self, media: MediaType, vehicle: &Vehicle) -> Result<Vec<u8>> {
        if !self.encodings.supports(media) {
            return Err(encoding_failure(EncodingError::Unsupported(media)));
        }
        if media == MediaType::Protobuf {
            return Ok(vehicle.encode_to_vec());
        }
        self.encodings
            .marshal(media, vehicle)
            .map_err(encoding_failure)
    }

    fn marshal_list(&self, media: MediaType, vehicles: &[Vehicle]) -> Result<Vec<u8>> {
        if !self.encodings.supports(media) {
            return Err(encoding_failure(EncodingError::Unsupported(media)));
        }
        match media {
            MediaType::Protobuf => {
                let list = VehicleList {
                    vehicles: vehicles.to_vec(),
                };
                Ok(list.encode_to_vec())
            }
            MediaType::Xml => {
                let list = VehicleList {
                    vehicles: vehicles.to_vec(),
                };
                self.encodings
                    .marshal(media, &list)
                    .map_err(encoding_failure)
            }
            _ => self
                .encodings
                .marshal(media, vehicles)
                .map_err(encoding_failure),
        }
    }

    async fn search(&self, query: &QueryParams) -> Result<Vec<Vehicle>> {
        let mut filter = Filter::all();
        for (key, values) in query.iter() {
            if !SEARCHABLE.contains(&key) {
                return Err(ResourceError::invalid_input(format!(
                    "Invalid query param: {}",
                    key
                )));
            }
            filter = filter.and_in(key, values.to_vec());
        }
        tracing::debug!(query = ?filter, "search query");

        self.store.query(&filter).await.map_err(|e| {
            tracing::error!(error = %e, "store error searching vehicles");
            ResourceError::internal(e.to_string())
        })
    }

    async fn list(&self) -> Result<Vec<Vehicle>> {
        self.store.query(&Filter::all()).await.map_err(|e| {
            tracing::error!(error = %e, "store error listing vehicles");
            ResourceError::internal(e.to_string())
        })
    }

    async fn get(&self, ctx: &RequestContext) -> Result<Vehicle> {
        let vin = self.vin(ctx)?;
        self.store.query_one(vin).await.map_err(|e| classify(e, vin))
    }

    async fn delete(&self, ctx: &RequestContext) -> Result<()> {
        let vin = self.vin(ctx)?;
        let affected = self.store.delete(vin).await.map_err(|e| classify(e, vin))?;
        if affected == 0 {
            return Err(classify(StoreError::NoRows, vin));
        }
        tracing::debug!(vin, "deleted vehicle");
        Ok(())
    }

    async fn create(&self, vehicle: Vehicle) -> Result<Vehicle> {
        let vin = vehicle.vin.clone();
        let created = self
            .store
            .insert(vehicle, &|previous| self.stamp(previous))
            .await
            .map_err(|e| classify(e, &vin))?;
        tracing::debug!(vin = %vin, updated_at = created.updated_at, "created vehicle");
        Ok(created)
    }

    async fn update(&self, mut vehicle: Vehicle, ctx: &RequestContext) -> Result<Vehicle> {
        let vin = self.vin(ctx)?;
        vehicle.vin = vin.to_string();
        let updated = self
            .store
            .update(vin, vehicle, &|previous| self.stamp(previous))
            .await
            .map_err(|e| classify(e, vin))?
            .ok_or_else(|| classify(StoreError::NoRows, vin))?;
        tracing::debug!(vin, updated_at = updated.updated_at, "updated vehicle");
        Ok(updated)
    }

    async fn get_etag(&self, ctx: &RequestContext) -> Result<ETag> {
        let vin = self.vin(ctx)?;
        let marker = self
            .store
            .query_marker(vin)
            .await
            .map_err(|e| classify(e, vin))?;
        Ok(ETag::compute(vin, marker))
    }

    fn build_etag(&self, vehicle: &Vehicle) -> Result<ETag> {
        let vin = self
            .identity(vehicle)
            .ok_or_else(|| ResourceError::internal("Vehicle does not contain a VIN"))?;
        if vehicle.updated_at == 0 {
            return Err(ResourceError::internal(
                "Vehicle does not contain an updated_at timestamp",
            ));
        }
        Ok(ETag::compute(vin, vehicle.updated_at))
    }
}
