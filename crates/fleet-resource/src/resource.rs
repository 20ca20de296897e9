//! The resource contract.
//!
//! A domain entity type implements [`Resource`] once and is then served by
//! every transport. Transports only see the trait; the value type is an
//! associated type, fixed at compile time.

use crate::context::{QueryParams, RequestContext};
use crate::encoding::{EncodingRegistry, MediaType};
use crate::error::Result;
use crate::etag::ETag;
use std::fmt;

/// The mutation a payload is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
        };
        f.write_str(name)
    }
}

/// Where a resource lives in a path-addressed transport.
///
/// `collection` is the segment for the collection (`vehicles`) and
/// `identity_var` names the path variable carrying the identity (`vin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteBinding {
    pub collection: &'static str,
    pub identity_var: &'static str,
}

impl RouteBinding {
    /// `/vehicles`
    pub fn collection_path(&self) -> String {
        format!("/{}", self.collection)
    }

    /// `/vehicles/:vin`
    pub fn item_path(&self) -> String {
        format!("/{}/:{}", self.collection, self.identity_var)
    }

    /// A request context addressing `identity`.
    pub fn context_for(&self, identity: impl Into<String>) -> RequestContext {
        RequestContext::new().with_var(self.identity_var, identity)
    }
}

/// Operations a domain entity must provide to be served.
#[async_trait::async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Transport-neutral value of one entity.
    type Value: Clone + Send + Sync + 'static;

    /// Create the backing storage schema.
    async fn create_schema(&self) -> Result<()>;

    /// Route binding mounted by path-addressed transports.
    fn routes(&self) -> RouteBinding;

    /// Identity carried by `value`, if any.
    fn identity<'a>(&self, value: &'a Self::Value) -> Option<&'a str>;

    /// Check `value` is acceptable for `operation`.
    fn validate(&self, value: &Self::Value, operation: Operation) -> Result<()>;

    /// Encodings this resource accepts and produces.
    fn encodings(&self) -> &EncodingRegistry;

    fn unmarshal(&self, media: MediaType, data: &[u8]) -> Result<Self::Value>;

    fn marshal(&self, media: MediaType, value: &Self::Value) -> Result<Vec<u8>>;

    fn marshal_list(&self, media: MediaType, values: &[Self::Value]) -> Result<Vec<u8>>;

    /// Values matching `query`. Unknown keys are rejected before storage is touched.
    async fn search(&self, query: &QueryParams) -> Result<Vec<Self::Value>>;

    async fn list(&self) -> Result<Vec<Self::Value>>;

    async fn get(&self, ctx: &RequestContext) -> Result<Self::Value>;

    async fn delete(&self, ctx: &RequestContext) -> Result<()>;

    /// Persist a new value. The returned value carries its modification marker.
    async fn create(&self, value: Self::Value) -> Result<Self::Value>;

    /// Overwrite the value addressed by `ctx` and advance its marker.
    async fn update(&self, value: Self::Value, ctx: &RequestContext) -> Result<Self::Value>;

    /// Current tag of the value addressed by `ctx`, without loading the full value.
    async fn get_etag(&self, ctx: &RequestContext) -> Result<ETag>;

    /// Tag of an already loaded value.
    fn build_etag(&self, value: &Self::Value) -> Result<ETag>;
}
