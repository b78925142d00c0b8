// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use coap_lite::ResponseType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lwm2mError {
    NotDefined,
    AlreadyDefined,
    NotFound,
    AlreadyExists,
    InstanceLimit,
    TypeMismatch,
    MethodNotAllowed,
    Unauthorized,
    BadRequest,
    NotAcceptable,
    UnsupportedContentFormat,
    Encoding,
    InvalidUri,
}

impl Lwm2mError {
    /// CoAP response code reported to a server when a request fails with this error.
    pub fn response_type(&self) -> ResponseType {
        match self {
            Lwm2mError::NotDefined | Lwm2mError::NotFound => ResponseType::NotFound,
            Lwm2mError::MethodNotAllowed => ResponseType::MethodNotAllowed,
            Lwm2mError::Unauthorized => ResponseType::Unauthorized,
            Lwm2mError::NotAcceptable => ResponseType::NotAcceptable,
            Lwm2mError::UnsupportedContentFormat => ResponseType::UnsupportedContentFormat,
            Lwm2mError::AlreadyDefined => ResponseType::InternalServerError,
            Lwm2mError::AlreadyExists
            | Lwm2mError::InstanceLimit
            | Lwm2mError::TypeMismatch
            | Lwm2mError::BadRequest
            | Lwm2mError::Encoding
            | Lwm2mError::InvalidUri => ResponseType::BadRequest,
        }
    }
}

impl core::fmt::Display for Lwm2mError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Lwm2mError::NotDefined => "object not defined",
            Lwm2mError::AlreadyDefined => "object already defined",
            Lwm2mError::NotFound => "not found",
            Lwm2mError::AlreadyExists => "instance already exists",
            Lwm2mError::InstanceLimit => "object does not allow more instances",
            Lwm2mError::TypeMismatch => "value does not match resource type",
            Lwm2mError::MethodNotAllowed => "operation not allowed on resource",
            Lwm2mError::Unauthorized => "unauthorized",
            Lwm2mError::BadRequest => "bad request",
            Lwm2mError::NotAcceptable => "content format not acceptable",
            Lwm2mError::UnsupportedContentFormat => "unsupported content format",
            Lwm2mError::Encoding => "malformed payload",
            Lwm2mError::InvalidUri => "invalid server uri",
        };
        write!(f, "{}", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_client_error_codes() {
        assert_eq!(Lwm2mError::NotFound.response_type(), ResponseType::NotFound);
        assert_eq!(Lwm2mError::NotDefined.response_type(), ResponseType::NotFound);
        assert_eq!(Lwm2mError::TypeMismatch.response_type(), ResponseType::BadRequest);
        assert_eq!(Lwm2mError::MethodNotAllowed.response_type(), ResponseType::MethodNotAllowed);
        assert_eq!(Lwm2mError::Encoding.to_string(), "malformed payload");
    }
}
