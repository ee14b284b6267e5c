// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

pub mod bus;
pub mod capture;
pub mod config;
pub mod detector;
pub mod fetch;
pub mod interceptor;
pub mod mcp;
pub mod platform;
pub mod proxy;
pub mod rewrite;
pub mod stream;
pub mod tools;
