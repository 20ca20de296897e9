//! Mapping from resource error classes to gRPC status codes.

use fleet_resource::{ErrorKind, ResourceError};
use tonic::{Code, Status};

pub fn code_for(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::Conflict => Code::AlreadyExists,
        ErrorKind::InvalidInput => Code::InvalidArgument,
        ErrorKind::PreconditionFailed => Code::FailedPrecondition,
        ErrorKind::UnsupportedMediaType | ErrorKind::Internal => Code::Internal,
    }
}

pub fn to_status(err: ResourceError) -> Status {
    Status::new(code_for(err.kind()), err.message())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            to_status(ResourceError::not_found("gone")).code(),
            Code::NotFound
        );
        assert_eq!(
            to_status(ResourceError::conflict("dup")).code(),
            Code::AlreadyExists
        );
        assert_eq!(
            to_status(ResourceError::invalid_input("bad")).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            to_status(ResourceError::precondition_failed("stale")).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            to_status(ResourceError::internal("boom")).code(),
            Code::Internal
        );

        let status = to_status(ResourceError::invalid_input("A make is required"));
        assert_eq!(status.message(), "A make is required");
    }
}
