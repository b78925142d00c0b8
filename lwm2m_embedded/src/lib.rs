// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod agent;
pub mod button;
pub mod coap;
pub mod net;
