//! Request pipeline shared by every transport.
//!
//! Each operation runs the same sequence regardless of how the request
//! arrived: decode, validate, check preconditions, invoke the resource, tag
//! the result. Transports only translate their wire format into a
//! [`Payload`] plus a [`RequestContext`] and map the outcome back.

use crate::context::{QueryParams, RequestContext};
use crate::error::{ErrorKind, ResourceError, Result};
use crate::etag::ETag;
use crate::resource::{Operation, Resource};
use bytes::Bytes;
use std::sync::Arc;

/// A request body, either still encoded or already a typed value.
#[derive(Debug, Clone)]
pub enum Payload<V> {
    /// Raw bytes and the `Content-Type` declarations that came with them.
    Encoded {
        content_types: Vec<String>,
        body: Bytes,
    },
    /// A value decoded by the transport itself (gRPC).
    Decoded(V),
}

impl<V> Payload<V> {
    pub fn encoded(content_types: Vec<String>, body: impl Into<Bytes>) -> Self {
        Payload::Encoded {
            content_types,
            body: body.into(),
        }
    }
}

/// A value with the tag it was served under.
///
/// `etag` is `None` when a tag could not be built; the value is still served.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<V> {
    pub value: V,
    pub etag: Option<ETag>,
}

/// Outcome of a conditional read.
#[derive(Debug, Clone, PartialEq)]
pub enum Conditional<V> {
    /// The client's tag is current.
    NotModified(ETag),
    Fresh(Tagged<V>),
}

pub struct Pipeline<R> {
    resource: Arc<R>,
}

impl<R> Clone for Pipeline<R> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

impl<R: Resource> Pipeline<R> {
    pub fn new(resource: Arc<R>) -> Self {
        Self { resource }
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub async fn create(&self, payload: Payload<R::Value>) -> Result<Tagged<R::Value>> {
        let value = self.decode(payload, Operation::Create)?;
        let created = self.resource.create(value).await?;
        Ok(self.tag(created))
    }

    /// Update the value addressed by `ctx`, if `precondition` (when given)
    /// names its current tag.
    pub async fn update(
        &self,
        payload: Payload<R::Value>,
        ctx: &RequestContext,
        precondition: Option<&str>,
    ) -> Result<Tagged<R::Value>> {
        let value = self.decode(payload, Operation::Update)?;
        self.check_precondition(ctx, precondition).await?;
        let updated = self.resource.update(value, ctx).await?;
        Ok(self.tag(updated))
    }

    pub async fn delete(&self, ctx: &RequestContext, precondition: Option<&str>) -> Result<()> {
        self.check_precondition(ctx, precondition).await?;
        self.resource.delete(ctx).await
    }

    /// Read the value addressed by `ctx`, short-circuiting when
    /// `if_none_match` names its current tag.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        if_none_match: Option<&str>,
    ) -> Result<Conditional<R::Value>> {
        if let Some(supplied) = if_none_match {
            let current = self.current_etag(ctx).await?;
            if current.matches(supplied) {
                return Ok(Conditional::NotModified(current));
            }
        }
        Ok(Conditional::Fresh(self.fetch(ctx).await?))
    }

    /// Read the value addressed by `ctx` unconditionally.
    pub async fn fetch(&self, ctx: &RequestContext) -> Result<Tagged<R::Value>> {
        let value = self.resource.get(ctx).await?;
        Ok(self.tag(value))
    }

    /// `list` for an empty query, `search` otherwise.
    pub async fn collection(&self, query: &QueryParams) -> Result<Vec<R::Value>> {
        if query.is_empty() {
            self.resource.list().await
        } else {
            self.resource.search(query).await
        }
    }

    fn decode(&self, payload: Payload<R::Value>, operation: Operation) -> Result<R::Value> {
        let value = match payload {
            Payload::Decoded(value) => value,
            Payload::Encoded {
                content_types,
                body,
            } => {
                let media = self
                    .resource
                    .encodings()
                    .request_encoding(content_types.iter().map(String::as_str))
                    .ok_or_else(|| {
                        ResourceError::unsupported_media_type(format!(
                            "No such encoding: {}",
                            content_types.join(", ")
                        ))
                    })?;
                self.resource.unmarshal(media, &body)?
            }
        };
        if let Err(e) = self.resource.validate(&value, operation) {
            tracing::debug!(%operation, error = %e, "rejected payload");
            return Err(e);
        }
        Ok(value)
    }

    async fn check_precondition(&self, ctx: &RequestContext, supplied: Option<&str>) -> Result<()> {
        let Some(supplied) = supplied else {
            return Ok(());
        };
        let current = self.current_etag(ctx).await?;
        if current.matches(supplied) {
            Ok(())
        } else {
            tracing::debug!(%current, supplied, "precondition failed");
            Err(ResourceError::precondition_failed(
                "Resource has been modified since it was last read",
            ))
        }
    }

    async fn current_etag(&self, ctx: &RequestContext) -> Result<ETag> {
        self.resource.get_etag(ctx).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => e,
            _ => {
                tracing::error!(error = %e, "failed to read current etag");
                ResourceError::internal(e.message())
            }
        })
    }

    fn tag(&self, value: R::Value) -> Tagged<R::Value> {
        let etag = match self.resource.build_etag(&value) {
            Ok(etag) => Some(etag),
            Err(e) => {
                tracing::warn!(error = %e, "serving response without etag");
                None
            }
        };
        Tagged { value, etag }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{APPLICATION_JSON, APPLICATION_YAML};
    use crate::memory::MemoryStore;
    use crate::vehicle::{StoredVehicle, Vehicle, VIN};

    fn vehicle(vin: &str) -> Vehicle {
        Vehicle {
            vin: vin.to_string(),
            make: "Honda".to_string(),
            model: "Civic".to_string(),
            year: 2004,
            exterior_color: "silver".to_string(),
            interior_color: "grey".to_string(),
            updated_at: 0,
        }
    }

    async fn pipeline() -> Pipeline<StoredVehicle> {
        let resource = StoredVehicle::new(Arc::new(MemoryStore::new()));
        resource.create_schema().await.unwrap();
        Pipeline::new(Arc::new(resource))
    }

    fn ctx(vin: &str) -> RequestContext {
        RequestContext::new().with_var(VIN, vin)
    }

    fn json(body: &str) -> Payload<Vehicle> {
        Payload::encoded(vec![APPLICATION_JSON.to_string()], body.to_string())
    }

    #[tokio::test]
    async fn test_create_tags_result() {
        let p = pipeline().await;
        let created = p.create(Payload::Decoded(vehicle("V1"))).await.unwrap();
        let etag = created.etag.unwrap();
        assert_eq!(etag, p.resource().get_etag(&ctx("V1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_decodes_first_supported_content_type() {
        let p = pipeline().await;
        let payload = Payload::encoded(
            vec!["text/plain".to_string(), APPLICATION_YAML.to_string()],
            "vin: Y1\nmake: Kia\nmodel: Soul\nyear: 2015\nexterior_color: green\ninterior_color: tan\n",
        );
        let created = p.create(payload).await.unwrap();
        assert_eq!(created.value.vin, "Y1");
        assert_eq!(created.value.make, "Kia");
    }

    #[tokio::test]
    async fn test_unsupported_content_type_is_rejected_before_parsing() {
        let p = pipeline().await;
        let err = p
            .create(Payload::encoded(vec!["text/plain".to_string()], "vin=V1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
    }

    #[tokio::test]
    async fn test_invalid_body_is_invalid_input() {
        let p = pipeline().await;
        let err = p.create(json("{not json")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = p.create(json(r#"{"vin":"V1"}"#)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.message(), "A make is required");
    }

    #[tokio::test]
    async fn test_update_with_current_tag_succeeds() {
        let p = pipeline().await;
        let created = p.create(Payload::Decoded(vehicle("V1"))).await.unwrap();
        let tag = created.etag.unwrap().header_value();

        let mut body = vehicle("V1");
        body.model = "Accord".to_string();
        let updated = p
            .update(Payload::Decoded(body), &ctx("V1"), Some(&tag))
            .await
            .unwrap();
        assert_eq!(updated.value.model, "Accord");
        assert_ne!(updated.etag.unwrap().header_value(), tag);
    }

    #[tokio::test]
    async fn test_stale_tag_leaves_value_unchanged() {
        let p = pipeline().await;
        let first = p.create(Payload::Decoded(vehicle("V1"))).await.unwrap();
        let stale = first.etag.unwrap().header_value();
        p.update(Payload::Decoded(vehicle("V1")), &ctx("V1"), None)
            .await
            .unwrap();
        let before = p.resource().get(&ctx("V1")).await.unwrap();

        let mut body = vehicle("V1");
        body.make = "Acura".to_string();
        let err = p
            .update(Payload::Decoded(body), &ctx("V1"), Some(&stale))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let err = p.delete(&ctx("V1"), Some(&stale)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        assert_eq!(p.resource().get(&ctx("V1")).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_precondition_on_missing_value_is_not_found() {
        let p = pipeline().await;
        let err = p.delete(&ctx("V9"), Some("\"abc\"")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_validation_runs_before_precondition() {
        let p = pipeline().await;
        let err = p
            .update(json(r#"{"make":"Honda"}"#), &ctx("V9"), Some("\"abc\""))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_conditional_get() {
        let p = pipeline().await;
        let created = p.create(Payload::Decoded(vehicle("V1"))).await.unwrap();
        let tag = created.etag.unwrap();

        match p.get(&ctx("V1"), Some(&tag.header_value())).await.unwrap() {
            Conditional::NotModified(current) => assert_eq!(current, tag),
            Conditional::Fresh(_) => panic!("expected not modified"),
        }

        match p.get(&ctx("V1"), Some("\"stale\"")).await.unwrap() {
            Conditional::Fresh(tagged) => {
                assert_eq!(tagged.value, created.value);
                assert_eq!(tagged.etag, Some(tag));
            }
            Conditional::NotModified(_) => panic!("expected a fresh value"),
        }

        assert_eq!(
            p.get(&ctx("V2"), None).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_collection_lists_or_searches() {
        let p = pipeline().await;
        p.create(Payload::Decoded(vehicle("A"))).await.unwrap();
        let mut other = vehicle("B");
        other.make = "Mazda".to_string();
        p.create(Payload::Decoded(other)).await.unwrap();

        assert_eq!(p.collection(&QueryParams::new()).await.unwrap().len(), 2);
        let mazdas = p
            .collection(&QueryParams::parse("make=Mazda"))
            .await
            .unwrap();
        assert_eq!(mazdas.len(), 1);
        assert_eq!(mazdas[0].vin, "B");

        let err = p
            .collection(&QueryParams::parse("color=red"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
