// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod client;
pub mod coap_mapping;
pub mod encoding;
pub mod error;
pub mod object;
pub mod objects;
pub mod observe;
pub mod options;
pub mod transport;
pub mod uri;
