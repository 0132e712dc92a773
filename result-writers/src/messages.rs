// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test lifecycle messages consumed by result writers.
//!
//! Messages arrive in nesting order: an assembly contains collections, which contain classes,
//! which contain methods, which contain test cases, which contain tests. Every message carries the
//! unique ID of its own scope and of all enclosing scopes. IDs are opaque strings that are only
//! used to correlate starting and finished messages.

use crate::errors::{FailureInfoError, SummaryError};
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use std::time::Duration;

/// Traits (name to values) attached to a scope.
pub type Traits = IndexMap<String, Vec<String>>;

/// The name of the trait that carries test categories.
pub const CATEGORY_TRAIT: &str = "Category";

/// A test lifecycle message.
#[derive(Clone, Debug)]
pub enum TestMessage {
    /// A test assembly is starting.
    AssemblyStarting(AssemblyStarting),
    /// A test assembly has finished.
    AssemblyFinished(AssemblyFinished),
    /// Cleaning up a test assembly failed.
    AssemblyCleanupFailure(CleanupFailure<AssemblyIds>),

    /// A test collection is starting.
    CollectionStarting(CollectionStarting),
    /// A test collection has finished.
    CollectionFinished(ScopeFinished<CollectionIds>),
    /// Cleaning up a test collection failed.
    CollectionCleanupFailure(CleanupFailure<CollectionIds>),

    /// A test class is starting.
    ClassStarting(ClassStarting),
    /// A test class has finished.
    ClassFinished(ScopeFinished<ClassIds>),
    /// Cleaning up a test class failed.
    ClassCleanupFailure(CleanupFailure<ClassIds>),

    /// A test method is starting.
    MethodStarting(MethodStarting),
    /// A test method has finished.
    MethodFinished(ScopeFinished<MethodIds>),
    /// Cleaning up a test method failed.
    MethodCleanupFailure(CleanupFailure<MethodIds>),

    /// A test case is starting.
    CaseStarting(CaseStarting),
    /// A test case has finished.
    CaseFinished(ScopeFinished<CaseIds>),
    /// Cleaning up a test case failed.
    CaseCleanupFailure(CleanupFailure<CaseIds>),

    /// A test is starting.
    TestStarting(TestStarting),
    /// A test passed.
    TestPassed(TestResultInfo),
    /// A test failed.
    TestFailed(TestFailed),
    /// A test was skipped.
    TestSkipped(TestSkipped),
    /// A test was not run.
    TestNotRun(TestResultInfo),
    /// A test has finished. Sent after the result message.
    TestFinished(TestFinished),
    /// Cleaning up a test failed.
    TestCleanupFailure(CleanupFailure<TestIds>),

    /// An error that isn't attributable to a specific scope.
    ErrorMessage(ErrorMessage),
}

impl TestMessage {
    /// Returns a short, stable name for the kind of message, used for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::AssemblyStarting(_) => "assembly-starting",
            Self::AssemblyFinished(_) => "assembly-finished",
            Self::AssemblyCleanupFailure(_) => "assembly-cleanup-failure",
            Self::CollectionStarting(_) => "collection-starting",
            Self::CollectionFinished(_) => "collection-finished",
            Self::CollectionCleanupFailure(_) => "collection-cleanup-failure",
            Self::ClassStarting(_) => "class-starting",
            Self::ClassFinished(_) => "class-finished",
            Self::ClassCleanupFailure(_) => "class-cleanup-failure",
            Self::MethodStarting(_) => "method-starting",
            Self::MethodFinished(_) => "method-finished",
            Self::MethodCleanupFailure(_) => "method-cleanup-failure",
            Self::CaseStarting(_) => "case-starting",
            Self::CaseFinished(_) => "case-finished",
            Self::CaseCleanupFailure(_) => "case-cleanup-failure",
            Self::TestStarting(_) => "test-starting",
            Self::TestPassed(_) => "test-passed",
            Self::TestFailed(_) => "test-failed",
            Self::TestSkipped(_) => "test-skipped",
            Self::TestNotRun(_) => "test-not-run",
            Self::TestFinished(_) => "test-finished",
            Self::TestCleanupFailure(_) => "test-cleanup-failure",
            Self::ErrorMessage(_) => "error-message",
        }
    }

    /// Returns the unique ID of the assembly this message belongs to, if any.
    pub fn assembly_unique_id(&self) -> Option<&str> {
        let id = match self {
            Self::AssemblyStarting(m) => &m.assembly_unique_id,
            Self::AssemblyFinished(m) => &m.assembly_unique_id,
            Self::AssemblyCleanupFailure(m) => &m.ids.assembly,
            Self::CollectionStarting(m) => &m.ids.assembly,
            Self::CollectionFinished(m) => &m.ids.assembly,
            Self::CollectionCleanupFailure(m) => &m.ids.assembly,
            Self::ClassStarting(m) => &m.ids.assembly,
            Self::ClassFinished(m) => &m.ids.assembly,
            Self::ClassCleanupFailure(m) => &m.ids.assembly,
            Self::MethodStarting(m) => &m.ids.assembly,
            Self::MethodFinished(m) => &m.ids.assembly,
            Self::MethodCleanupFailure(m) => &m.ids.assembly,
            Self::CaseStarting(m) => &m.ids.assembly,
            Self::CaseFinished(m) => &m.ids.assembly,
            Self::CaseCleanupFailure(m) => &m.ids.assembly,
            Self::TestStarting(m) => &m.ids.assembly,
            Self::TestPassed(m) | Self::TestNotRun(m) => &m.ids.assembly,
            Self::TestFailed(m) => &m.result.ids.assembly,
            Self::TestSkipped(m) => &m.result.ids.assembly,
            Self::TestFinished(m) => &m.result.ids.assembly,
            Self::TestCleanupFailure(m) => &m.ids.assembly,
            Self::ErrorMessage(m) => return m.assembly_unique_id.as_deref(),
        };
        Some(id)
    }
}

/// IDs for an assembly-level message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AssemblyIds {
    /// The unique ID of the assembly.
    pub assembly: String,
}

/// IDs for a collection-level message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CollectionIds {
    /// The unique ID of the assembly.
    pub assembly: String,
    /// The unique ID of the collection.
    pub collection: String,
}

/// IDs for a class-level message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ClassIds {
    /// The unique ID of the assembly.
    pub assembly: String,
    /// The unique ID of the collection.
    pub collection: String,
    /// The unique ID of the class.
    pub class: String,
}

/// IDs for a method-level message.
///
/// Tests that aren't defined by a class (for example, tests written in some non-C# languages)
/// have no class ID.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MethodIds {
    /// The unique ID of the assembly.
    pub assembly: String,
    /// The unique ID of the collection.
    pub collection: String,
    /// The unique ID of the class, if any.
    pub class: Option<String>,
    /// The unique ID of the method.
    pub method: String,
}

/// IDs for a test case-level message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CaseIds {
    /// The unique ID of the assembly.
    pub assembly: String,
    /// The unique ID of the collection.
    pub collection: String,
    /// The unique ID of the class, if any.
    pub class: Option<String>,
    /// The unique ID of the method, if any.
    pub method: Option<String>,
    /// The unique ID of the test case.
    pub case: String,
}

/// IDs for a test-level message.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TestIds {
    /// The unique ID of the assembly.
    pub assembly: String,
    /// The unique ID of the collection.
    pub collection: String,
    /// The unique ID of the class, if any.
    pub class: Option<String>,
    /// The unique ID of the method, if any.
    pub method: Option<String>,
    /// The unique ID of the test case.
    pub case: String,
    /// The unique ID of the test.
    pub test: String,
}

/// A summary of the tests run within a scope. Attached to every finished message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecutionSummary {
    /// The total number of tests.
    pub total: usize,
    /// The number of failed tests.
    pub failed: usize,
    /// The number of skipped tests.
    pub skipped: usize,
    /// The number of tests that weren't run.
    pub not_run: usize,
    /// The time spent executing tests.
    pub execution_time: Duration,
}

impl ExecutionSummary {
    /// Creates a new summary, checking that the failed, skipped and not run counts fit within the
    /// total.
    pub fn new(
        total: usize,
        failed: usize,
        skipped: usize,
        not_run: usize,
        execution_time: Duration,
    ) -> Result<Self, SummaryError> {
        let accounted = failed
            .checked_add(skipped)
            .and_then(|n| n.checked_add(not_run));
        match accounted {
            Some(accounted) if accounted <= total => Ok(Self {
                total,
                failed,
                skipped,
                not_run,
                execution_time,
            }),
            _ => Err(SummaryError {
                total,
                failed,
                skipped,
                not_run,
            }),
        }
    }

    /// The number of passed tests. Never negative, even for summaries built by hand.
    pub fn passed(&self) -> usize {
        self.total
            .saturating_sub(self.failed)
            .saturating_sub(self.skipped)
            .saturating_sub(self.not_run)
    }

    /// Adds the counts and execution time of another summary to this one.
    pub fn add(&mut self, other: &ExecutionSummary) {
        self.total += other.total;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.not_run += other.not_run;
        self.execution_time += other.execution_time;
    }
}

/// A single exception within a [`FailureInfo`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExceptionInfo {
    /// The fully qualified type of the exception, if known.
    pub exception_type: Option<String>,
    /// The exception message.
    pub message: String,
    /// The stack trace, if available.
    pub stack_trace: Option<String>,
    /// The index of the parent exception, or `None` for a root exception.
    pub parent_index: Option<usize>,
}

/// Information about a failure: a forest of (possibly nested or aggregate) exceptions.
///
/// Every parent index refers to an earlier exception, so the forest has no forward or cyclic
/// references.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureInfo {
    exceptions: Vec<ExceptionInfo>,
}

impl FailureInfo {
    /// Creates a new failure from a list of exceptions, validating parent indices.
    pub fn new(exceptions: Vec<ExceptionInfo>) -> Result<Self, FailureInfoError> {
        for (index, exception) in exceptions.iter().enumerate() {
            if let Some(parent) = exception.parent_index {
                if parent >= index {
                    return Err(FailureInfoError::InvalidParent {
                        index,
                        parent: parent as i64,
                    });
                }
            }
        }
        Ok(Self { exceptions })
    }

    /// Creates a failure with a single root exception.
    pub fn single(
        exception_type: Option<impl Into<String>>,
        message: impl Into<String>,
        stack_trace: Option<impl Into<String>>,
    ) -> Self {
        Self {
            exceptions: vec![ExceptionInfo {
                exception_type: exception_type.map(Into::into),
                message: message.into(),
                stack_trace: stack_trace.map(Into::into),
                parent_index: None,
            }],
        }
    }

    /// Creates a failure from the parallel-array form, where a negative parent index marks a
    /// root exception.
    pub fn from_parallel(
        exception_types: Vec<Option<String>>,
        messages: Vec<String>,
        stack_traces: Vec<Option<String>>,
        parent_indices: Vec<i64>,
    ) -> Result<Self, FailureInfoError> {
        let len = exception_types.len();
        if messages.len() != len || stack_traces.len() != len || parent_indices.len() != len {
            return Err(FailureInfoError::LengthMismatch {
                types: len,
                messages: messages.len(),
                stack_traces: stack_traces.len(),
                parent_indices: parent_indices.len(),
            });
        }

        let mut exceptions = Vec::with_capacity(len);
        let iter = exception_types
            .into_iter()
            .zip(messages)
            .zip(stack_traces)
            .zip(parent_indices);
        for (index, (((exception_type, message), stack_trace), parent)) in iter.enumerate() {
            let parent_index = if parent < 0 {
                None
            } else if (parent as u64) < index as u64 {
                Some(parent as usize)
            } else {
                return Err(FailureInfoError::InvalidParent { index, parent });
            };
            exceptions.push(ExceptionInfo {
                exception_type,
                message,
                stack_trace,
                parent_index,
            });
        }

        Ok(Self { exceptions })
    }

    /// Returns the exceptions in this failure.
    pub fn exceptions(&self) -> &[ExceptionInfo] {
        &self.exceptions
    }

    /// Returns the type of the first (outermost) exception, if any.
    pub fn first_exception_type(&self) -> Option<&str> {
        self.exceptions
            .first()
            .and_then(|exception| exception.exception_type.as_deref())
    }
}

/// An attachment added to a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestAttachment {
    /// A string value, materialized as UTF-8 plain text.
    String(String),
    /// Binary data with a media type.
    ByteArray {
        /// The attachment contents.
        bytes: Vec<u8>,
        /// The media (MIME) type of the contents.
        media_type: String,
    },
}

/// A test assembly is starting.
#[derive(Clone, Debug)]
pub struct AssemblyStarting {
    /// The unique ID of the assembly.
    pub assembly_unique_id: String,
    /// The simple name of the assembly.
    pub assembly_name: String,
    /// The on-disk path to the assembly, if known. Dynamic assemblies have no path.
    pub assembly_path: Option<String>,
    /// The path to the configuration file, if any.
    pub config_file_path: Option<String>,
    /// When the assembly started running.
    pub start_time: DateTime<FixedOffset>,
    /// The target framework moniker, e.g. `.NETCoreApp,Version=v8.0`.
    pub target_framework: Option<String>,
    /// A description of the test environment, e.g. `64-bit .NET 8.0.0 [collection-per-class]`.
    pub test_environment: String,
    /// The display name of the test framework.
    pub test_framework_display_name: String,
    /// Traits attached to the assembly.
    pub traits: Traits,
}

/// A test assembly has finished.
#[derive(Clone, Debug)]
pub struct AssemblyFinished {
    /// The unique ID of the assembly.
    pub assembly_unique_id: String,
    /// The summary of the tests in the assembly.
    pub summary: ExecutionSummary,
    /// When the assembly finished running.
    pub finish_time: DateTime<FixedOffset>,
}

/// A scope below the assembly level has finished.
#[derive(Clone, Debug)]
pub struct ScopeFinished<I> {
    /// The IDs of the scope.
    pub ids: I,
    /// The summary of the tests in the scope.
    pub summary: ExecutionSummary,
    /// When the scope finished running.
    pub finish_time: DateTime<FixedOffset>,
}

/// Cleaning up a scope failed.
#[derive(Clone, Debug)]
pub struct CleanupFailure<I> {
    /// The IDs of the scope.
    pub ids: I,
    /// The failure.
    pub failure: FailureInfo,
}

/// A test collection is starting.
#[derive(Clone, Debug)]
pub struct CollectionStarting {
    /// The IDs of the collection.
    pub ids: CollectionIds,
    /// The name of the collection definition class, if any.
    pub collection_class_name: Option<String>,
    /// The display name of the collection.
    pub collection_display_name: String,
    /// When the collection started running.
    pub start_time: DateTime<FixedOffset>,
    /// Traits attached to the collection.
    pub traits: Traits,
}

/// A test class is starting.
#[derive(Clone, Debug)]
pub struct ClassStarting {
    /// The IDs of the class.
    pub ids: ClassIds,
    /// The fully qualified name of the class.
    pub class_name: String,
    /// The name of the class without its namespace.
    pub class_simple_name: String,
    /// The namespace of the class, if any.
    pub class_namespace: Option<String>,
    /// When the class started running.
    pub start_time: DateTime<FixedOffset>,
    /// Traits attached to the class.
    pub traits: Traits,
}

/// A test method is starting.
#[derive(Clone, Debug)]
pub struct MethodStarting {
    /// The IDs of the method.
    pub ids: MethodIds,
    /// The name of the method.
    pub method_name: String,
    /// When the method started running.
    pub start_time: DateTime<FixedOffset>,
    /// Traits attached to the method.
    pub traits: Traits,
}

/// A test case is starting.
#[derive(Clone, Debug)]
pub struct CaseStarting {
    /// The IDs of the test case.
    pub ids: CaseIds,
    /// The display name of the test case.
    pub display_name: String,
    /// The reason the test case is statically skipped, if any.
    pub skip_reason: Option<String>,
    /// The source file the test case is defined in, if known.
    pub source_file_path: Option<String>,
    /// The line the test case is defined on, if known.
    pub source_line_number: Option<u32>,
    /// The fully qualified name of the class, if any.
    pub class_name: Option<String>,
    /// The name of the method, if any.
    pub method_name: Option<String>,
    /// When the test case started running.
    pub start_time: DateTime<FixedOffset>,
    /// Traits attached to the test case.
    pub traits: Traits,
}

/// A test is starting.
#[derive(Clone, Debug)]
pub struct TestStarting {
    /// The IDs of the test.
    pub ids: TestIds,
    /// The display name of the test.
    pub display_name: String,
    /// When the test started running.
    pub start_time: DateTime<FixedOffset>,
    /// Traits attached to the test.
    pub traits: Traits,
}

/// Information common to all test results.
#[derive(Clone, Debug)]
pub struct TestResultInfo {
    /// The IDs of the test.
    pub ids: TestIds,
    /// The time spent executing the test.
    pub execution_time: Duration,
    /// When the test finished.
    pub finish_time: DateTime<FixedOffset>,
    /// The output captured while the test ran.
    pub output: String,
    /// Warnings reported while the test ran, if any.
    pub warnings: Option<Vec<String>>,
}

impl TestResultInfo {
    /// Returns the warnings reported by the test, or an empty slice.
    pub fn warnings(&self) -> &[String] {
        self.warnings.as_deref().unwrap_or_default()
    }
}

/// A test failed.
#[derive(Clone, Debug)]
pub struct TestFailed {
    /// The result information.
    pub result: TestResultInfo,
    /// The failure.
    pub failure: FailureInfo,
}

/// A test was skipped.
#[derive(Clone, Debug)]
pub struct TestSkipped {
    /// The result information.
    pub result: TestResultInfo,
    /// Why the test was skipped.
    pub reason: String,
}

/// A test has finished.
#[derive(Clone, Debug)]
pub struct TestFinished {
    /// The result information.
    pub result: TestResultInfo,
    /// Attachments added by the test, keyed by name.
    pub attachments: IndexMap<String, TestAttachment>,
}

/// An error that isn't attributable to a specific scope.
#[derive(Clone, Debug)]
pub struct ErrorMessage {
    /// The assembly the error occurred in, if known.
    pub assembly_unique_id: Option<String>,
    /// The failure.
    pub failure: FailureInfo,
}
