// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message builders and output capture shared by unit tests.
//!
//! Builders return messages for a single assembly containing a single collection, class, method,
//! test case and test. Use the `default_*` functions together with struct update syntax to
//! customize them.

use crate::{
    config::ResultWriterConfig,
    environment::{HostIdentity, MapEnv},
    fs::{FileSystem, InMemoryFileSystem},
    messages::*,
    platform::{HostPlatform, OsPlatform},
    writers::{ResultWriter, WriterContext},
};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use indexmap::IndexMap;
use proptest::prelude::*;
use report_xml::XmlElement;
use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

pub(crate) const ASSEMBLY_ID: &str = "assembly-id";
pub(crate) const ASSEMBLY_NAME: &str = "test-assembly";
pub(crate) const ASSEMBLY_PATH: &str = "./test-assembly.dll";
pub(crate) const CONFIG_PATH: &str = "./test-assembly.json";
pub(crate) const TARGET_FRAMEWORK: &str = ".NETCoreApp,Version=v8.0";
pub(crate) const TEST_ENVIRONMENT: &str = "64-bit .NET 8.0.0 [collection-per-class, parallel]";
pub(crate) const TEST_FRAMEWORK: &str = "xUnit.net v3 3.0.0";

pub(crate) const COLLECTION_ID: &str = "test-collection-id";
pub(crate) const COLLECTION_DISPLAY_NAME: &str = "test-collection-display-name";
pub(crate) const CLASS_ID: &str = "test-class-id";
pub(crate) const CLASS_NAME: &str = "test-class-name";
pub(crate) const METHOD_ID: &str = "test-method-id";
pub(crate) const METHOD_NAME: &str = "test-method";
pub(crate) const CASE_ID: &str = "test-case-id";
pub(crate) const CASE_DISPLAY_NAME: &str = "test-case-display-name";
pub(crate) const TEST_ID: &str = "test-id";
pub(crate) const TEST_DISPLAY_NAME: &str = "test-display-name";

pub(crate) const EXCEPTION_TYPE: &str = "System.DivideByZeroException";
pub(crate) const EXCEPTION_MESSAGE: &str =
    "Attempted to divide by zero. Did you really think that was going to work?";
pub(crate) const STACK_TRACE: &str =
    "/path/file.cs(42,0): at SomeInnerCall()\n/path/otherFile.cs(2112,0): at SomeOuterMethod";
/// `EXCEPTION_TYPE : EXCEPTION_MESSAGE`, as rendered by the message combiner.
pub(crate) const COMBINED_MESSAGE: &str = "System.DivideByZeroException : Attempted to divide by zero. Did you really think that was going to work?";

pub(crate) const ATTACHMENTS_DIR: &str = "/attachments";
pub(crate) const TOOL_VERSION: &str = "3.0.0-test";

/// 123.4567 seconds.
pub(crate) const EXECUTION_TIME: Duration = Duration::from_micros(123_456_700);

pub(crate) fn start_time() -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2024, 7, 4, 21, 12, 8)
        .single()
        .expect("valid time")
        .fixed_offset()
}

pub(crate) fn finish_time() -> DateTime<FixedOffset> {
    start_time() + chrono::Duration::seconds(20)
}

pub(crate) fn summary(
    total: usize,
    failed: usize,
    skipped: usize,
    not_run: usize,
    execution_time: Duration,
) -> ExecutionSummary {
    ExecutionSummary::new(total, failed, skipped, not_run, execution_time)
        .expect("test summary is valid")
}

pub(crate) fn default_summary() -> ExecutionSummary {
    summary(2112, 42, 6, 0, EXECUTION_TIME)
}

/// Generates valid summaries.
pub(crate) fn summary_strategy() -> impl Strategy<Value = ExecutionSummary> {
    (
        0usize..5000,
        0usize..100,
        0usize..100,
        0usize..100,
        0u64..10_000_000_000,
    )
        .prop_map(|(passed, failed, skipped, not_run, micros)| ExecutionSummary {
            total: passed + failed + skipped + not_run,
            failed,
            skipped,
            not_run,
            execution_time: Duration::from_micros(micros),
        })
}

// ---
// IDs
// ---

pub(crate) fn collection_ids() -> CollectionIds {
    CollectionIds {
        assembly: ASSEMBLY_ID.to_owned(),
        collection: COLLECTION_ID.to_owned(),
    }
}

pub(crate) fn class_ids() -> ClassIds {
    ClassIds {
        assembly: ASSEMBLY_ID.to_owned(),
        collection: COLLECTION_ID.to_owned(),
        class: CLASS_ID.to_owned(),
    }
}

pub(crate) fn method_ids() -> MethodIds {
    MethodIds {
        assembly: ASSEMBLY_ID.to_owned(),
        collection: COLLECTION_ID.to_owned(),
        class: Some(CLASS_ID.to_owned()),
        method: METHOD_ID.to_owned(),
    }
}

pub(crate) fn case_ids() -> CaseIds {
    CaseIds {
        assembly: ASSEMBLY_ID.to_owned(),
        collection: COLLECTION_ID.to_owned(),
        class: Some(CLASS_ID.to_owned()),
        method: Some(METHOD_ID.to_owned()),
        case: CASE_ID.to_owned(),
    }
}

pub(crate) fn test_ids() -> TestIds {
    TestIds {
        assembly: ASSEMBLY_ID.to_owned(),
        collection: COLLECTION_ID.to_owned(),
        class: Some(CLASS_ID.to_owned()),
        method: Some(METHOD_ID.to_owned()),
        case: CASE_ID.to_owned(),
        test: TEST_ID.to_owned(),
    }
}

// ---
// Assembly
// ---

pub(crate) fn default_assembly_starting() -> AssemblyStarting {
    AssemblyStarting {
        assembly_unique_id: ASSEMBLY_ID.to_owned(),
        assembly_name: ASSEMBLY_NAME.to_owned(),
        assembly_path: Some(ASSEMBLY_PATH.to_owned()),
        config_file_path: Some(CONFIG_PATH.to_owned()),
        start_time: start_time(),
        target_framework: Some(TARGET_FRAMEWORK.to_owned()),
        test_environment: TEST_ENVIRONMENT.to_owned(),
        test_framework_display_name: TEST_FRAMEWORK.to_owned(),
        traits: Traits::new(),
    }
}

pub(crate) fn assembly_starting() -> TestMessage {
    TestMessage::AssemblyStarting(default_assembly_starting())
}

/// An assembly with its own ID and path, starting `offset_secs` after the default start time.
pub(crate) fn assembly_starting_for(id: &str, path: &str, offset_secs: i64) -> TestMessage {
    TestMessage::AssemblyStarting(AssemblyStarting {
        assembly_unique_id: id.to_owned(),
        assembly_path: Some(path.to_owned()),
        start_time: start_time() + chrono::Duration::seconds(offset_secs),
        ..default_assembly_starting()
    })
}

pub(crate) fn assembly_finished(summary: ExecutionSummary) -> TestMessage {
    assembly_finished_for(ASSEMBLY_ID, summary)
}

pub(crate) fn assembly_finished_for(id: &str, summary: ExecutionSummary) -> TestMessage {
    TestMessage::AssemblyFinished(AssemblyFinished {
        assembly_unique_id: id.to_owned(),
        summary,
        finish_time: finish_time(),
    })
}

// ---
// Collection, class, method and test case
// ---

pub(crate) fn default_collection_starting() -> CollectionStarting {
    CollectionStarting {
        ids: collection_ids(),
        collection_class_name: None,
        collection_display_name: COLLECTION_DISPLAY_NAME.to_owned(),
        start_time: start_time(),
        traits: Traits::new(),
    }
}

pub(crate) fn collection_starting() -> TestMessage {
    TestMessage::CollectionStarting(default_collection_starting())
}

pub(crate) fn collection_finished(summary: ExecutionSummary) -> TestMessage {
    TestMessage::CollectionFinished(ScopeFinished {
        ids: collection_ids(),
        summary,
        finish_time: finish_time(),
    })
}

pub(crate) fn default_class_starting() -> ClassStarting {
    ClassStarting {
        ids: class_ids(),
        class_name: CLASS_NAME.to_owned(),
        class_simple_name: CLASS_NAME.to_owned(),
        class_namespace: None,
        start_time: start_time(),
        traits: Traits::new(),
    }
}

pub(crate) fn class_starting() -> TestMessage {
    TestMessage::ClassStarting(default_class_starting())
}

pub(crate) fn class_finished() -> TestMessage {
    class_finished_with(default_summary())
}

pub(crate) fn class_finished_with(summary: ExecutionSummary) -> TestMessage {
    TestMessage::ClassFinished(ScopeFinished {
        ids: class_ids(),
        summary,
        finish_time: finish_time(),
    })
}

pub(crate) fn default_method_starting() -> MethodStarting {
    MethodStarting {
        ids: method_ids(),
        method_name: METHOD_NAME.to_owned(),
        start_time: start_time(),
        traits: Traits::new(),
    }
}

pub(crate) fn method_starting() -> TestMessage {
    TestMessage::MethodStarting(default_method_starting())
}

pub(crate) fn method_finished() -> TestMessage {
    TestMessage::MethodFinished(ScopeFinished {
        ids: method_ids(),
        summary: default_summary(),
        finish_time: finish_time(),
    })
}

pub(crate) fn default_case_starting() -> CaseStarting {
    CaseStarting {
        ids: case_ids(),
        display_name: CASE_DISPLAY_NAME.to_owned(),
        skip_reason: None,
        source_file_path: None,
        source_line_number: None,
        class_name: Some(CLASS_NAME.to_owned()),
        method_name: Some(METHOD_NAME.to_owned()),
        start_time: start_time(),
        traits: Traits::new(),
    }
}

pub(crate) fn case_starting() -> TestMessage {
    TestMessage::CaseStarting(default_case_starting())
}

pub(crate) fn case_finished() -> TestMessage {
    TestMessage::CaseFinished(ScopeFinished {
        ids: case_ids(),
        summary: default_summary(),
        finish_time: finish_time(),
    })
}

// ---
// Tests
// ---

pub(crate) fn default_test_starting() -> TestStarting {
    TestStarting {
        ids: test_ids(),
        display_name: TEST_DISPLAY_NAME.to_owned(),
        start_time: start_time(),
        traits: Traits::new(),
    }
}

pub(crate) fn test_starting() -> TestMessage {
    TestMessage::TestStarting(default_test_starting())
}

pub(crate) fn default_result(execution_time: Duration, output: &str) -> TestResultInfo {
    TestResultInfo {
        ids: test_ids(),
        execution_time,
        finish_time: finish_time(),
        output: output.to_owned(),
        warnings: None,
    }
}

pub(crate) fn test_passed(execution_time: Duration, output: &str) -> TestMessage {
    TestMessage::TestPassed(default_result(execution_time, output))
}

pub(crate) fn test_passed_with_warnings(output: &str, warnings: &[&str]) -> TestMessage {
    TestMessage::TestPassed(TestResultInfo {
        warnings: Some(warnings.iter().map(|w| (*w).to_owned()).collect()),
        ..default_result(EXECUTION_TIME, output)
    })
}

pub(crate) fn default_failure() -> FailureInfo {
    FailureInfo::single(Some(EXCEPTION_TYPE), EXCEPTION_MESSAGE, Some(STACK_TRACE))
}

pub(crate) fn test_failed(execution_time: Duration, output: &str) -> TestMessage {
    test_failed_with(default_result(execution_time, output), default_failure())
}

pub(crate) fn test_failed_with(result: TestResultInfo, failure: FailureInfo) -> TestMessage {
    TestMessage::TestFailed(TestFailed { result, failure })
}

pub(crate) fn test_skipped(reason: &str) -> TestMessage {
    TestMessage::TestSkipped(TestSkipped {
        result: default_result(Duration::ZERO, ""),
        reason: reason.to_owned(),
    })
}

pub(crate) fn test_not_run() -> TestMessage {
    TestMessage::TestNotRun(default_result(Duration::ZERO, ""))
}

pub(crate) fn test_finished() -> TestMessage {
    test_finished_with_attachments(IndexMap::new())
}

pub(crate) fn test_finished_with_attachments(
    attachments: IndexMap<String, TestAttachment>,
) -> TestMessage {
    TestMessage::TestFinished(TestFinished {
        result: default_result(EXECUTION_TIME, ""),
        attachments,
    })
}

/// The messages for a single test in the default assembly, from `AssemblyStarting` to
/// `AssemblyFinished`, with `result` as the test's result message.
pub(crate) fn single_test_run(result: TestMessage, summary: ExecutionSummary) -> Vec<TestMessage> {
    vec![
        assembly_starting(),
        collection_starting(),
        class_starting(),
        method_starting(),
        case_starting(),
        test_starting(),
        result,
        test_finished(),
        case_finished(),
        method_finished(),
        class_finished_with(summary),
        collection_finished(summary),
        assembly_finished(summary),
    ]
}

// ---
// Errors
// ---

pub(crate) fn error_message() -> TestMessage {
    TestMessage::ErrorMessage(ErrorMessage {
        assembly_unique_id: Some(ASSEMBLY_ID.to_owned()),
        failure: default_failure(),
    })
}

pub(crate) fn assembly_cleanup_failure() -> TestMessage {
    TestMessage::AssemblyCleanupFailure(CleanupFailure {
        ids: AssemblyIds {
            assembly: ASSEMBLY_ID.to_owned(),
        },
        failure: default_failure(),
    })
}

pub(crate) fn collection_cleanup_failure() -> TestMessage {
    TestMessage::CollectionCleanupFailure(CleanupFailure {
        ids: collection_ids(),
        failure: default_failure(),
    })
}

pub(crate) fn class_cleanup_failure() -> TestMessage {
    TestMessage::ClassCleanupFailure(CleanupFailure {
        ids: class_ids(),
        failure: default_failure(),
    })
}

pub(crate) fn method_cleanup_failure() -> TestMessage {
    TestMessage::MethodCleanupFailure(CleanupFailure {
        ids: method_ids(),
        failure: default_failure(),
    })
}

pub(crate) fn case_cleanup_failure() -> TestMessage {
    TestMessage::CaseCleanupFailure(CleanupFailure {
        ids: case_ids(),
        failure: default_failure(),
    })
}

pub(crate) fn test_cleanup_failure() -> TestMessage {
    TestMessage::TestCleanupFailure(CleanupFailure {
        ids: test_ids(),
        failure: default_failure(),
    })
}

/// One of each kind of error message, all attributed to the default assembly.
pub(crate) fn error_messages() -> Vec<TestMessage> {
    vec![
        error_message(),
        assembly_cleanup_failure(),
        case_cleanup_failure(),
        class_cleanup_failure(),
        test_cleanup_failure(),
        collection_cleanup_failure(),
        method_cleanup_failure(),
    ]
}

// ---
// Output capture
// ---

/// An output that can be read back after the writer that owns it is gone.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        let bytes = self.0.lock().expect("lock not poisoned").clone();
        String::from_utf8(bytes).expect("output is UTF-8")
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("lock not poisoned").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes `tracing` output to the test harness so that ignored messages show up in failure logs.
pub(crate) fn init_test_logging() {
    // Another test may have installed the subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Feeds every message to the writer, then disposes it.
pub(crate) fn run_writer(writer: &mut dyn ResultWriter, messages: &[TestMessage]) {
    handle_all(writer, messages);
    writer.dispose().expect("writer disposed");
}

/// Feeds every message to the writer without disposing it.
pub(crate) fn handle_all(writer: &mut dyn ResultWriter, messages: &[TestMessage]) {
    init_test_logging();
    for message in messages {
        assert!(
            writer.handle_message(message),
            "writer declined {}",
            message.kind_name()
        );
    }
}

pub(crate) fn parse_xml(buffer: &SharedBuffer) -> XmlElement {
    let contents = buffer.contents();
    XmlElement::parse(&contents)
        .unwrap_or_else(|error| panic!("output is valid XML ({error}):\n{contents}"))
}

pub(crate) fn parse_json(buffer: &SharedBuffer) -> serde_json::Value {
    let contents = buffer.contents();
    serde_json::from_str(&contents)
        .unwrap_or_else(|error| panic!("output is valid JSON ({error}):\n{contents}"))
}

// ---
// Context
// ---

pub(crate) fn test_platform() -> HostPlatform {
    HostPlatform {
        os: OsPlatform::Linux,
        os_description: "Ubuntu 24.04 LTS".to_owned(),
        architecture: "x64".to_owned(),
    }
}

/// A context with no resolvable host identity, so writers use their fallbacks.
pub(crate) fn test_context() -> (WriterContext, Arc<InMemoryFileSystem>) {
    test_context_with_host(HostIdentity::resolve(&MapEnv::new()))
}

/// A context where the computer and user resolve.
pub(crate) fn test_context_with_identity() -> (WriterContext, Arc<InMemoryFileSystem>) {
    let env: MapEnv = [("HOSTNAME", "expected-computer"), ("USER", "expected-user")]
        .into_iter()
        .collect();
    test_context_with_host(HostIdentity::resolve(&env))
}

pub(crate) fn test_context_with_host(
    host: HostIdentity,
) -> (WriterContext, Arc<InMemoryFileSystem>) {
    let fs = Arc::new(InMemoryFileSystem::new());
    let mut config = ResultWriterConfig::new(ATTACHMENTS_DIR);
    config.set_tool_version(TOOL_VERSION);
    let context = WriterContext::new(config, host, test_platform(), fs.clone());
    (context, fs)
}

/// A context whose attachments go to `fs`.
pub(crate) fn test_context_with_fs(fs: Arc<dyn FileSystem>) -> WriterContext {
    let mut config = ResultWriterConfig::new(ATTACHMENTS_DIR);
    config.set_tool_version(TOOL_VERSION);
    WriterContext::new(
        config,
        HostIdentity::resolve(&MapEnv::new()),
        test_platform(),
        fs,
    )
}

/// A file system with no space left: every write fails.
#[derive(Debug, Default)]
pub(crate) struct FullFileSystem;

impl FullFileSystem {
    fn disk_full() -> io::Error {
        io::Error::new(io::ErrorKind::StorageFull, "disk full")
    }
}

impl FileSystem for FullFileSystem {
    fn exists(&self, _path: &Utf8Path) -> bool {
        false
    }

    fn read_all_bytes(&self, _path: &Utf8Path) -> io::Result<Vec<u8>> {
        Err(io::ErrorKind::NotFound.into())
    }

    fn read_all_text(&self, _path: &Utf8Path) -> io::Result<String> {
        Err(io::ErrorKind::NotFound.into())
    }

    fn write_all_bytes(&self, _path: &Utf8Path, _bytes: &[u8]) -> io::Result<()> {
        Err(Self::disk_full())
    }

    fn create_dir_all(&self, _path: &Utf8Path) -> io::Result<()> {
        Err(Self::disk_full())
    }
}
