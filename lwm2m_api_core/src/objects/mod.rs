// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-License-Identifier: MIT
pub mod device;
pub mod digital_input;
pub mod flow;
pub mod security;
pub mod server;
