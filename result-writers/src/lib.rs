// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Result writers for test lifecycle message streams.
//!
//! A test run is delivered as an ordered stream of [`messages::TestMessage`] values: assembly,
//! collection, class, method, case and test starting and finished events, test results, and
//! cleanup failures. Each [`writers::ResultWriter`] consumes that stream and renders one report
//! format (CTRF, HTML, JUnit, NUnit, TRX, or xUnit XML v1/v2).
//!
//! Writers build the whole report in memory and write it out exactly once, when they're disposed.

pub mod attachments;
pub mod config;
pub mod environment;
pub mod errors;
pub mod exception;
pub mod fs;
mod helpers;
pub mod messages;
pub mod metadata;
pub mod platform;
#[cfg(test)]
mod test_helpers;
pub mod writers;
