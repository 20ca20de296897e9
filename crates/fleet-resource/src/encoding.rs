//! Body encodings and content negotiation.
//!
//! The registry knows JSON, XML and YAML in both directions. Protobuf is
//! registered so negotiation treats it as supported, but the registry has no
//! generic protobuf codec: its marshal/unmarshal fail loudly and resources
//! that speak protobuf encode their own messages.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_XML: &str = "application/xml";
pub const TEXT_XML: &str = "text/xml";
pub const APPLICATION_YAML: &str = "application/yaml";
pub const APPLICATION_PROTOBUF: &str = "application/x-protobuf";

/// A media type the service knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Json,
    Xml,
    Yaml,
    Protobuf,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Json => APPLICATION_JSON,
            MediaType::Xml => APPLICATION_XML,
            MediaType::Yaml => APPLICATION_YAML,
            MediaType::Protobuf => APPLICATION_PROTOBUF,
        }
    }

    /// Match a single declaration such as `application/json; charset=utf-8`.
    ///
    /// Parameters are ignored and the comparison is case-insensitive.
    /// `text/xml` is read as XML.
    pub fn from_declaration(declaration: &str) -> Option<Self> {
        let essence = declaration.split(';').next()?.trim();
        if essence.eq_ignore_ascii_case(TEXT_XML) {
            return Some(MediaType::Xml);
        }
        [
            MediaType::Json,
            MediaType::Xml,
            MediaType::Yaml,
            MediaType::Protobuf,
        ]
        .into_iter()
        .find(|m| m.as_str().eq_ignore_ascii_case(essence))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("No such encoding: {0}")]
    Unsupported(MediaType),

    #[error("No generic {0} codec; the resource must encode this media type itself")]
    NotImplemented(MediaType),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("XML body is not UTF-8: {0}")]
    XmlUtf8(#[from] std::str::Utf8Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EncodingError {
    /// Whether the error came from a malformed body rather than the registry.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            EncodingError::Json(_)
                | EncodingError::Xml(_)
                | EncodingError::XmlUtf8(_)
                | EncodingError::Yaml(_)
        )
    }
}

/// Ordered set of registered encodings.
///
/// The first registered encoding is the fallback for responses when the
/// request expresses no usable preference.
#[derive(Debug, Clone)]
pub struct EncodingRegistry {
    encodings: Vec<MediaType>,
}

impl Default for EncodingRegistry {
    fn default() -> Self {
        Self::new(vec![
            MediaType::Json,
            MediaType::Xml,
            MediaType::Yaml,
            MediaType::Protobuf,
        ])
    }
}

impl EncodingRegistry {
    /// Create a registry. Falls back to JSON alone when `encodings` is empty.
    pub fn new(encodings: Vec<MediaType>) -> Self {
        let encodings = if encodings.is_empty() {
            vec![MediaType::Json]
        } else {
            encodings
        };
        Self { encodings }
    }

    pub fn encodings(&self) -> &[MediaType] {
        &self.encodings
    }

    pub fn supports(&self, media: MediaType) -> bool {
        self.encodings.contains(&media)
    }

    pub fn marshal<T: Serialize + ?Sized>(
        &self,
        media: MediaType,
        value: &T,
    ) -> Result<Vec<u8>, EncodingError> {
        if !self.supports(media) {
            return Err(EncodingError::Unsupported(media));
        }
        match media {
            MediaType::Json => Ok(serde_json::to_vec(value)?),
            MediaType::Xml => Ok(quick_xml::se::to_string(value)?.into_bytes()),
            MediaType::Yaml => Ok(serde_yaml::to_string(value)?.into_bytes()),
            MediaType::Protobuf => Err(EncodingError::NotImplemented(media)),
        }
    }

    pub fn unmarshal<T: DeserializeOwned>(
        &self,
        media: MediaType,
        data: &[u8],
    ) -> Result<T, EncodingError> {
        if !self.supports(media) {
            return Err(EncodingError::Unsupported(media));
        }
        match media {
            MediaType::Json => Ok(serde_json::from_slice(data)?),
            MediaType::Xml => Ok(quick_xml::de::from_str(std::str::from_utf8(data)?)?),
            MediaType::Yaml => Ok(serde_yaml::from_slice(data)?),
            MediaType::Protobuf => Err(EncodingError::NotImplemented(media)),
        }
    }

    /// Encoding of a request body: the first supported Content-Type declaration.
    ///
    /// `None` means the caller must reject the body as an unsupported media type.
    pub fn request_encoding<'a, I>(&self, content_types: I) -> Option<MediaType>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.first_supported(content_types)
    }

    /// Encoding of a response body.
    ///
    /// First supported Accept declaration, else the request's own content
    /// type, else the first registered encoding.
    pub fn response_encoding<'a, A, C>(&self, accepts: A, content_types: C) -> MediaType
    where
        A: IntoIterator<Item = &'a str>,
        C: IntoIterator<Item = &'a str>,
    {
        self.first_supported(accepts)
            .or_else(|| self.first_supported(content_types))
            .unwrap_or(self.encodings[0])
    }

    fn first_supported<'a, I>(&self, headers: I) -> Option<MediaType>
    where
        I: IntoIterator<Item = &'a str>,
    {
        headers
            .into_iter()
            .flat_map(|value| value.split(','))
            .filter_map(MediaType::from_declaration)
            .find(|m| self.supports(*m))
    }
}
