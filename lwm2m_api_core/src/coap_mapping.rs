// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
use alloc::string::String;
use alloc::vec::Vec;
use coap_lite::{CoapOption, MessageClass, MessageType, RequestType, ResponseType};

/// Minimal big-endian encoding used by CoAP uint options.
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub fn decode_uint(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 4 {
        return None;
    }
    Some(bytes.iter().fold(0_u32, |acc, b| (acc << 8) | *b as u32))
}

/// Server reply to a request, before it is framed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub code: ResponseType,
    pub content_format: Option<u16>,
    pub observe: Option<u32>,
    pub location: Vec<String>,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn new(code: ResponseType) -> Self {
        Reply {
            code,
            content_format: None,
            observe: None,
            location: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn content(content_format: u16, payload: Vec<u8>) -> Self {
        Reply {
            content_format: Some(content_format),
            payload,
            ..Reply::new(ResponseType::Content)
        }
    }
}

#[derive(Debug)]
pub struct CoapEncoderError;

impl core::fmt::Display for CoapEncoderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CoAP encoder error")
    }
}

pub struct CoapEncoder {}

impl CoapEncoder {
    pub fn encode_bootstrap_request(endpoint_name: &str, message_id: u16, token: &[u8]) -> Result<Vec<u8>, CoapEncoderError> {
        let queries = [alloc::format!("ep={}", endpoint_name)];
        Self::encode_request(RequestType::Post, message_id, token, &["bs"], &queries, None, &[])
    }

    pub fn encode_register(
        endpoint_name: &str,
        lifetime_s: u32,
        binding: &str,
        links: &str,
        message_id: u16,
        token: &[u8],
    ) -> Result<Vec<u8>, CoapEncoderError> {
        let queries = [
            alloc::format!("ep={}", endpoint_name),
            alloc::format!("lt={}", lifetime_s),
            String::from("lwm2m=1.0"),
            alloc::format!("b={}", binding),
        ];
        Self::encode_request(
            RequestType::Post,
            message_id,
            token,
            &["rd"],
            &queries,
            Some(crate::encoding::CONTENT_FORMAT_LINK),
            links.as_bytes(),
        )
    }

    /// Update sent to the registration location. Lifetime and links are only carried when they changed.
    pub fn encode_update(location: &[String], lifetime_s: Option<u32>, links: Option<&str>, message_id: u16, token: &[u8]) -> Result<Vec<u8>, CoapEncoderError> {
        let segments: Vec<&str> = location.iter().map(String::as_str).collect();
        let queries: Vec<String> = lifetime_s.map(|lt| alloc::format!("lt={}", lt)).into_iter().collect();
        let (content_format, payload) = match links {
            Some(links) => (Some(crate::encoding::CONTENT_FORMAT_LINK), links.as_bytes()),
            None => (None, &[][..]),
        };
        Self::encode_request(RequestType::Post, message_id, token, &segments, &queries, content_format, payload)
    }

    pub fn encode_deregister(location: &[String], message_id: u16, token: &[u8]) -> Result<Vec<u8>, CoapEncoderError> {
        let segments: Vec<&str> = location.iter().map(String::as_str).collect();
        Self::encode_request(RequestType::Delete, message_id, token, &segments, &[], None, &[])
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_request(
        method: RequestType,
        message_id: u16,
        token: &[u8],
        path: &[&str],
        queries: &[String],
        content_format: Option<u16>,
        payload: &[u8],
    ) -> Result<Vec<u8>, CoapEncoderError> {
        let mut packet = coap_lite::Packet::new();
        packet.header.set_version(1);
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(method);
        packet.header.message_id = message_id;
        packet.set_token(token.to_vec());
        for segment in path.iter().filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        if let Some(content_format) = content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(content_format as u32));
        }
        for query in queries {
            packet.add_option(CoapOption::UriQuery, query.as_bytes().to_vec());
        }
        packet.payload = payload.to_vec();
        packet.to_bytes().map_err(|_| CoapEncoderError {})
    }

    /// Piggybacked response to a confirmable request, or a non-confirmable response to a NON request.
    pub fn encode_response(request: &Request, reply: &Reply, message_id: u16) -> Result<Vec<u8>, CoapEncoderError> {
        match request.confirmable {
            true => Self::encode_reply(MessageType::Acknowledgement, request.message_id, &request.token, reply),
            false => Self::encode_reply(MessageType::NonConfirmable, message_id, &request.token, reply),
        }
    }

    pub fn encode_notification(token: &[u8], message_id: u16, reply: &Reply) -> Result<Vec<u8>, CoapEncoderError> {
        Self::encode_reply(MessageType::NonConfirmable, message_id, token, reply)
    }

    fn encode_reply(message_type: MessageType, message_id: u16, token: &[u8], reply: &Reply) -> Result<Vec<u8>, CoapEncoderError> {
        let mut packet = coap_lite::Packet::new();
        packet.header.set_version(1);
        packet.header.set_type(message_type);
        packet.header.code = MessageClass::Response(reply.code);
        packet.header.message_id = message_id;
        packet.set_token(token.to_vec());
        if let Some(observe) = reply.observe {
            packet.add_option(CoapOption::Observe, encode_uint(observe));
        }
        for segment in reply.location.iter() {
            packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
        }
        if let Some(content_format) = reply.content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(content_format as u32));
        }
        packet.payload = reply.payload.clone();
        packet.to_bytes().map_err(|_| CoapEncoderError {})
    }

    pub fn encode_empty_ack(message_id: u16) -> Result<Vec<u8>, CoapEncoderError> {
        Self::encode_empty(MessageType::Acknowledgement, message_id)
    }

    pub fn encode_reset(message_id: u16) -> Result<Vec<u8>, CoapEncoderError> {
        Self::encode_empty(MessageType::Reset, message_id)
    }

    fn encode_empty(message_type: MessageType, message_id: u16) -> Result<Vec<u8>, CoapEncoderError> {
        let mut packet = coap_lite::Packet::new();
        packet.header.set_version(1);
        packet.header.set_type(message_type);
        packet.header.code = MessageClass::Empty;
        packet.header.message_id = message_id;
        packet.to_bytes().map_err(|_| CoapEncoderError {})
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: RequestType,
    pub path: Vec<String>,
    pub queries: Vec<String>,
    pub observe: Option<u32>,
    pub accept: Option<u16>,
    pub content_format: Option<u16>,
    pub payload: Vec<u8>,
    pub token: Vec<u8>,
    pub message_id: u16,
    pub confirmable: bool,
}

impl Request {
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.path.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: ResponseType,
    pub message_type: MessageType,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub location: Vec<String>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        matches!(
            self.code,
            ResponseType::Created | ResponseType::Deleted | ResponseType::Valid | ResponseType::Changed | ResponseType::Content
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoapMessage {
    Request(Request),
    Response(Response),
    EmptyAck(u16),
    Reset(u16),
    /// Empty confirmable message, answered with a Reset.
    Ping(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoapDecoderError {
    Malformed,
    UnsupportedMessage,
}

impl core::fmt::Display for CoapDecoderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CoapDecoderError::Malformed => write!(f, "CoAP decoder error: malformed message"),
            CoapDecoderError::UnsupportedMessage => write!(f, "CoAP decoder error: unsupported message"),
        }
    }
}

pub struct CoapDecoder {}

impl CoapDecoder {
    pub fn decode(data: &[u8]) -> Result<CoapMessage, CoapDecoderError> {
        let packet = coap_lite::Packet::from_bytes(data).map_err(|_| CoapDecoderError::Malformed)?;
        let message_id = packet.header.message_id;
        match (packet.header.code, packet.header.get_type()) {
            (MessageClass::Empty, MessageType::Acknowledgement) => Ok(CoapMessage::EmptyAck(message_id)),
            (MessageClass::Empty, MessageType::Reset) => Ok(CoapMessage::Reset(message_id)),
            (MessageClass::Empty, MessageType::Confirmable) => Ok(CoapMessage::Ping(message_id)),
            (MessageClass::Request(method), message_type) => Ok(CoapMessage::Request(Self::decode_request(&packet, method, message_type)?)),
            (MessageClass::Response(code), message_type) => Ok(CoapMessage::Response(Response {
                code,
                message_type,
                message_id,
                token: packet.get_token().to_vec(),
                location: Self::string_options(&packet, CoapOption::LocationPath)?,
                payload: packet.payload.clone(),
            })),
            _ => Err(CoapDecoderError::UnsupportedMessage),
        }
    }

    fn decode_request(packet: &coap_lite::Packet, method: RequestType, message_type: MessageType) -> Result<Request, CoapDecoderError> {
        Ok(Request {
            method,
            path: Self::string_options(packet, CoapOption::UriPath)?,
            queries: Self::string_options(packet, CoapOption::UriQuery)?,
            observe: Self::uint_option(packet, CoapOption::Observe)?,
            accept: Self::uint_option(packet, CoapOption::Accept)?.map(|v| v as u16),
            content_format: Self::uint_option(packet, CoapOption::ContentFormat)?.map(|v| v as u16),
            payload: packet.payload.clone(),
            token: packet.get_token().to_vec(),
            message_id: packet.header.message_id,
            confirmable: message_type == MessageType::Confirmable,
        })
    }

    fn string_options(packet: &coap_lite::Packet, option: CoapOption) -> Result<Vec<String>, CoapDecoderError> {
        let mut values = Vec::new();
        if let Some(options) = packet.get_option(option) {
            for value in options.iter() {
                let text = core::str::from_utf8(value).map_err(|_| CoapDecoderError::Malformed)?;
                values.push(String::from(text));
            }
        }
        Ok(values)
    }

    fn uint_option(packet: &coap_lite::Packet, option: CoapOption) -> Result<Option<u32>, CoapDecoderError> {
        match packet.get_option(option).and_then(|options| options.front()) {
            Some(value) => decode_uint(value).map(Some).ok_or(CoapDecoderError::Malformed),
            None => Ok(None),
        }
    }
}
