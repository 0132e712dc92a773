// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by result writers.

use camino::Utf8PathBuf;
use thiserror::Error;

/// An error that occurs while writing a report to its sink.
///
/// Failures and cleanup failures reported by tests are data, not errors. This type only covers
/// resource faults.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    /// An error occurred while writing the report to the provided output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while operating on the file system.
    #[error("error operating on path {file}")]
    Fs {
        /// The file being operated on.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while producing an XML report.
    #[error("error writing {format} XML report")]
    Xml {
        /// The report format.
        format: &'static str,

        /// The underlying error.
        #[source]
        error: report_xml::SerializeError,
    },

    /// An error occurred while producing a JSON report.
    #[error("error writing {format} JSON report")]
    Json {
        /// The report format.
        format: &'static str,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurs while reading a [`ResultWriterConfig`](crate::config::ResultWriterConfig).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseError {
    /// The configuration file could not be read.
    #[error("failed to read config file at {path}")]
    Read {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The configuration could not be deserialized.
    #[error("failed to parse result writer config{}", DisplayPath(.path.as_ref()))]
    Deserialize {
        /// The path to the config file, if the config was read from a file.
        path: Option<Utf8PathBuf>,

        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },
}

struct DisplayPath<'a>(Option<&'a Utf8PathBuf>);

impl std::fmt::Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(path) => write!(f, " at {path}"),
            None => Ok(()),
        }
    }
}

/// An error that occurs while constructing a [`FailureInfo`](crate::messages::FailureInfo).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum FailureInfoError {
    /// The parallel arrays had different lengths.
    #[error(
        "exception arrays have mismatched lengths: {types} types, {messages} messages, \
         {stack_traces} stack traces, {parent_indices} parent indices"
    )]
    LengthMismatch {
        /// The number of exception types.
        types: usize,
        /// The number of messages.
        messages: usize,
        /// The number of stack traces.
        stack_traces: usize,
        /// The number of parent indices.
        parent_indices: usize,
    },

    /// A parent index didn't refer to an earlier exception.
    #[error("exception {index} has parent index {parent}, which is not an earlier exception")]
    InvalidParent {
        /// The index of the exception.
        index: usize,
        /// The invalid parent index.
        parent: i64,
    },
}

/// An error that occurs while constructing an
/// [`ExecutionSummary`](crate::messages::ExecutionSummary).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "failed ({failed}) + skipped ({skipped}) + not run ({not_run}) exceeds total ({total})"
)]
pub struct SummaryError {
    /// The total number of tests.
    pub total: usize,
    /// The number of failed tests.
    pub failed: usize,
    /// The number of skipped tests.
    pub skipped: usize,
    /// The number of tests that weren't run.
    pub not_run: usize,
}

/// An error returned while parsing a [`ResultFormat`](crate::writers::ResultFormat).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "unrecognized result format `{input}` (known formats: ctrf, html, junit, nunit, trx, xml, xmlv1)"
)]
pub struct ResultFormatParseError {
    /// The input that failed to parse.
    pub input: String,
}

/// Displays an error followed by each of its sources, separated by `: `.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: std::error::Error> std::fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_display() {
        let error = WriteError::Fs {
            file: "/tmp/report.xml".into(),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "error operating on path /tmp/report.xml: no such directory"
        );
    }
}
