// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
pub mod link_format;
pub mod text;
pub mod tlv;

pub const CONTENT_FORMAT_TEXT: u16 = 0;
pub const CONTENT_FORMAT_LINK: u16 = 40;
pub const CONTENT_FORMAT_OPAQUE: u16 = 42;
pub const CONTENT_FORMAT_TLV: u16 = 11542;
// Pre-registration TLV code point still sent by some LwM2M 1.0 servers.
pub const CONTENT_FORMAT_TLV_LEGACY: u16 = 1542;

pub fn is_tlv(content_format: u16) -> bool {
    content_format == CONTENT_FORMAT_TLV || content_format == CONTENT_FORMAT_TLV_LEGACY
}
