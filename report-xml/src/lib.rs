// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Build, serialize and read XML test result reports in Rust.
//!
//! Result formats such as JUnit, NUnit and TRX only know their rollup numbers once every event has
//! been seen, so reports are built as an in-memory [`XmlElement`] tree and written out once.

mod element;
mod errors;
mod parse;
mod serialize;

pub use element::*;
pub use errors::*;
