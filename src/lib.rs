// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Pegasus Heavy Industries LLC

//! Client for the OpenVPN management interface

pub mod config;
pub mod management;
pub mod secrets;
