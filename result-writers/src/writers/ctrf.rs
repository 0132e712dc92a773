// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CTRF (Common Test Report Format) JSON reports.
//!
//! Each assembly becomes an entry in `results.extra.suites`, and each test result becomes an
//! entry in `results.tests`. Optional values that aren't known are left out of the document
//! rather than written as `null`.

use super::{OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop};
use crate::{
    attachments::AttachmentMaterializer,
    errors::WriteError,
    exception::{combine_messages, combine_stack_traces},
    helpers::millis,
    messages::{
        AssemblyFinished, AssemblyStarting, CATEGORY_TRAIT, ExecutionSummary, FailureInfo,
        TestFinished, TestMessage, TestResultInfo, Traits,
    },
    metadata::{AssemblyArena, MetadataCache},
};
use camino::Utf8PathBuf;
use chrono::Utc;
use indexmap::IndexMap;
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::Serialize;
use std::io;
use tracing::trace;

/// The kind for CTRF report IDs.
pub enum CtrfReportKind {}

impl TypedUuidKind for CtrfReportKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("ctrf_report");
        TAG
    }
}

/// The unique ID of a CTRF report.
pub type CtrfReportUuid = TypedUuid<CtrfReportKind>;

const TOOL_NAME: &str = "xUnit.net v3";
const GENERATED_BY: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const UNKNOWN_TEST: &str = "<unknown test>";

/// Writes a CTRF JSON report.
#[derive(Debug)]
pub struct CtrfWriter<W: io::Write> {
    sink: ReportSink<W>,
    context: WriterContext,
    materializer: AttachmentMaterializer,
    cache: MetadataCache,
    assemblies: AssemblyArena<CtrfSuite>,
}

impl<W: io::Write> CtrfWriter<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    pub fn new(output: W, context: WriterContext) -> Self {
        Self {
            sink: ReportSink::new(ResultFormat::Ctrf, output),
            materializer: context.attachment_materializer(),
            context,
            cache: MetadataCache::new(),
            assemblies: AssemblyArena::new(),
        }
    }

    /// Registers a callback that receives the rendered report after it has been written.
    pub fn on_disposed(mut self, callback: OnDisposed) -> Self {
        self.sink.set_on_disposed(callback);
        self
    }

    fn suite_mut(&mut self, assembly_unique_id: &str) -> Option<&mut CtrfSuite> {
        match self.assemblies.get_mut(assembly_unique_id) {
            Some(entry) => Some(&mut entry.data),
            None => {
                trace!("ignoring message for unknown assembly `{assembly_unique_id}`");
                None
            }
        }
    }

    fn record_error(
        &mut self,
        assembly_unique_id: &str,
        kind: &'static str,
        name: Option<String>,
        failure: &FailureInfo,
    ) {
        if let Some(suite) = self.suite_mut(assembly_unique_id) {
            suite.errors.push(CtrfError {
                name,
                kind,
                exception: failure.first_exception_type().map(str::to_owned),
                message: combine_messages(failure),
                trace: combine_stack_traces(failure),
            });
        }
    }

    fn record_test(
        &mut self,
        result: &TestResultInfo,
        status: CtrfStatus,
        details: CtrfTestDetails,
    ) {
        let Some(entry) = self.assemblies.get_mut(&result.ids.assembly) else {
            trace!(
                "ignoring result for test `{}` in unknown assembly `{}`",
                result.ids.test, result.ids.assembly
            );
            return;
        };

        // Only the first result for a test is recorded.
        let cache = &self.cache;
        entry
            .data
            .tests
            .entry(result.ids.test.clone())
            .or_insert_with(|| CtrfTest::new(cache, result, status, details));
    }

    fn test_finished(&mut self, finished: &TestFinished) {
        if finished.attachments.is_empty() {
            return;
        }
        let ids = &finished.result.ids;
        let Some(test) = self
            .assemblies
            .get_mut(&ids.assembly)
            .and_then(|entry| entry.data.tests.get_mut(&ids.test))
        else {
            trace!("ignoring attachments for unrecorded test `{}`", ids.test);
            return;
        };

        match self.materializer.materialize(&ids.test, &finished.attachments) {
            Ok(attachments) => {
                test.attachments
                    .extend(attachments.into_iter().map(|attachment| CtrfAttachment {
                        name: attachment.name,
                        content_type: attachment.content_type,
                        path: attachment.path,
                    }));
            }
            Err(error) => self.sink.defer_error(error),
        }
    }
}

impl<W: io::Write> ResultWriter for CtrfWriter<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => {
                self.assemblies
                    .get_or_insert_with(&starting.assembly_unique_id, |_| {
                        CtrfSuite::new(starting)
                    });
            }
            TestMessage::AssemblyFinished(finished) => {
                if let Some(suite) = self.suite_mut(&finished.assembly_unique_id) {
                    suite.finish(finished);
                }
            }
            TestMessage::CollectionStarting(starting) => {
                if let Some(suite) = self.suite_mut(&starting.ids.assembly) {
                    if suite.collections.is_empty() {
                        suite.collections.push(CtrfCollection {
                            id: starting.ids.collection.clone(),
                            name: starting.collection_display_name.clone(),
                        });
                    }
                }
            }
            TestMessage::TestPassed(result) => {
                self.record_test(result, CtrfStatus::Passed, CtrfTestDetails::default());
            }
            TestMessage::TestFailed(failed) => {
                let details = CtrfTestDetails {
                    message: Some(combine_messages(&failed.failure)),
                    trace: combine_stack_traces(&failed.failure),
                    exception: failed.failure.first_exception_type().map(str::to_owned),
                };
                self.record_test(&failed.result, CtrfStatus::Failed, details);
            }
            TestMessage::TestSkipped(skipped) => {
                let details = CtrfTestDetails {
                    message: Some(skipped.reason.clone()),
                    ..CtrfTestDetails::default()
                };
                self.record_test(&skipped.result, CtrfStatus::Skipped, details);
            }
            TestMessage::TestNotRun(result) => {
                self.record_test(result, CtrfStatus::Pending, CtrfTestDetails::default());
            }
            TestMessage::TestFinished(finished) => self.test_finished(finished),
            TestMessage::ErrorMessage(error) => {
                if let Some(id) = &error.assembly_unique_id {
                    self.record_error(id, "fatal", None, &error.failure);
                }
            }
            TestMessage::AssemblyCleanupFailure(m) => {
                let name = self
                    .cache
                    .assembly(&m.ids.assembly)
                    .and_then(|assembly| assembly.assembly_path.clone());
                self.record_error(&m.ids.assembly, "assembly-cleanup", name, &m.failure);
            }
            TestMessage::CollectionCleanupFailure(m) => {
                let name = self
                    .cache
                    .collection(&m.ids.collection)
                    .map(|collection| collection.collection_display_name.clone());
                self.record_error(&m.ids.assembly, "test-collection-cleanup", name, &m.failure);
            }
            TestMessage::ClassCleanupFailure(m) => {
                let name = self
                    .cache
                    .class(Some(&m.ids.class))
                    .map(|class| class.class_name.clone());
                self.record_error(&m.ids.assembly, "test-class-cleanup", name, &m.failure);
            }
            TestMessage::MethodCleanupFailure(m) => {
                let name = self
                    .cache
                    .method(Some(&m.ids.method))
                    .map(|method| method.method_name.clone());
                self.record_error(&m.ids.assembly, "test-method-cleanup", name, &m.failure);
            }
            TestMessage::CaseCleanupFailure(m) => {
                let name = self
                    .cache
                    .case(&m.ids.case)
                    .map(|case| case.display_name.clone());
                self.record_error(&m.ids.assembly, "test-case-cleanup", name, &m.failure);
            }
            TestMessage::TestCleanupFailure(m) => {
                let name = self
                    .cache
                    .test(&m.ids.test)
                    .map(|test| test.display_name.clone());
                self.record_error(&m.ids.assembly, "test-cleanup", name, &m.failure);
            }
            TestMessage::CollectionFinished(_)
            | TestMessage::ClassStarting(_)
            | TestMessage::ClassFinished(_)
            | TestMessage::MethodStarting(_)
            | TestMessage::MethodFinished(_)
            | TestMessage::CaseStarting(_)
            | TestMessage::CaseFinished(_)
            | TestMessage::TestStarting(_) => {}
        }

        self.cache.evict(message);
        true
    }

    fn dispose(&mut self) -> Result<(), WriteError> {
        let context = &self.context;
        let assemblies = &self.assemblies;
        self.sink
            .finish_json(|| CtrfReport::new(context, assemblies))
    }
}

impl<W: io::Write> Drop for CtrfWriter<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::Ctrf);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CtrfReport<'a> {
    report_format: &'static str,
    spec_version: &'static str,
    report_id: CtrfReportUuid,
    timestamp: String,
    generated_by: &'static str,
    results: CtrfResults<'a>,
}

impl<'a> CtrfReport<'a> {
    fn new(context: &'a WriterContext, assemblies: &'a AssemblyArena<CtrfSuite>) -> Self {
        let mut summary = CtrfSummary::default();
        let mut start = None::<i64>;
        let mut stop = None::<i64>;
        for (_, entry) in assemblies.iter() {
            let suite = &entry.data;
            summary.add(&suite.summary);
            start = Some(start.map_or(suite.start, |start| start.min(suite.start)));
            if let Some(suite_stop) = suite.stop {
                stop = Some(stop.map_or(suite_stop, |stop| stop.max(suite_stop)));
            }
        }
        summary.start = start.unwrap_or_default();
        summary.stop = stop.unwrap_or_default();

        let host = context.host();
        let platform = context.platform();
        Self {
            report_format: "CTRF",
            spec_version: "0.0.0",
            report_id: CtrfReportUuid::new_v4(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            generated_by: GENERATED_BY,
            results: CtrfResults {
                tool: CtrfTool {
                    name: TOOL_NAME,
                    version: context.config().tool_version(),
                },
                summary,
                environment: CtrfEnvironment {
                    os_platform: platform.os.display_name(),
                    os_release: &platform.os_description,
                },
                extra: CtrfExtra {
                    computer: host.computer.as_deref(),
                    user: host.user.as_deref(),
                    suites: assemblies.iter_by_id().map(|(_, entry)| &entry.data).collect(),
                },
                tests: assemblies
                    .iter()
                    .flat_map(|(_, entry)| entry.data.tests.values())
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct CtrfResults<'a> {
    tool: CtrfTool<'a>,
    summary: CtrfSummary,
    environment: CtrfEnvironment<'a>,
    extra: CtrfExtra<'a>,
    tests: Vec<&'a CtrfTest>,
}

#[derive(Debug, Serialize)]
struct CtrfTool<'a> {
    name: &'static str,
    version: &'a str,
}

#[derive(Debug, Default, Serialize)]
struct CtrfSummary {
    tests: usize,
    passed: usize,
    failed: usize,
    pending: usize,
    skipped: usize,
    // Reserved by the format, always zero.
    other: usize,
    suites: usize,
    start: i64,
    stop: i64,
}

impl CtrfSummary {
    fn add(&mut self, summary: &ExecutionSummary) {
        self.tests += summary.total;
        self.passed += summary.passed();
        self.failed += summary.failed;
        self.pending += summary.not_run;
        self.skipped += summary.skipped;
        self.suites += 1;
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CtrfEnvironment<'a> {
    os_platform: &'static str,
    os_release: &'a str,
}

#[derive(Debug, Serialize)]
struct CtrfExtra<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    computer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    suites: Vec<&'a CtrfSuite>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CtrfSuite {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_path: Option<String>,
    environment: String,
    test_framework: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_framework: Option<String>,
    start: i64,
    // Zero until the assembly finishes.
    #[serde(serialize_with = "serialize_stop")]
    stop: Option<i64>,
    duration: u64,
    collections: Vec<CtrfCollection>,
    errors: Vec<CtrfError>,

    #[serde(skip)]
    summary: ExecutionSummary,
    #[serde(skip)]
    tests: IndexMap<String, CtrfTest>,
}

fn serialize_stop<S: serde::Serializer>(
    stop: &Option<i64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(stop.unwrap_or_default())
}

impl CtrfSuite {
    fn new(starting: &AssemblyStarting) -> Self {
        Self {
            id: starting.assembly_unique_id.clone(),
            file_path: starting.assembly_path.clone(),
            config_path: starting.config_file_path.clone(),
            environment: starting.test_environment.clone(),
            test_framework: starting.test_framework_display_name.clone(),
            target_framework: starting.target_framework.clone(),
            start: starting.start_time.timestamp_millis(),
            stop: None,
            duration: 0,
            collections: Vec::new(),
            errors: Vec::new(),
            summary: ExecutionSummary::default(),
            tests: IndexMap::new(),
        }
    }

    fn finish(&mut self, finished: &AssemblyFinished) {
        self.summary = finished.summary;
        self.duration = millis(finished.summary.execution_time);
        self.stop = Some(finished.finish_time.timestamp_millis());
    }
}

#[derive(Debug, Serialize)]
struct CtrfCollection {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct CtrfError {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CtrfStatus {
    Passed,
    Failed,
    Skipped,
    Pending,
}

#[derive(Debug, Default)]
struct CtrfTestDetails {
    message: Option<String>,
    trace: Option<String>,
    exception: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CtrfTest {
    name: String,
    status: CtrfStatus,
    duration: u64,
    suite: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<CtrfAttachment>,
    extra: CtrfTestExtra,
}

impl CtrfTest {
    fn new(
        cache: &MetadataCache,
        result: &TestResultInfo,
        status: CtrfStatus,
        details: CtrfTestDetails,
    ) -> Self {
        let ids = &result.ids;
        let test = cache.test(&ids.test);
        let case = cache.case(&ids.case);
        let traits = test.map(|test| test.traits.clone()).unwrap_or_default();

        Self {
            name: test.map_or_else(|| UNKNOWN_TEST.to_owned(), |test| test.display_name.clone()),
            status,
            duration: millis(result.execution_time),
            suite: ids.assembly.clone(),
            file_path: case.and_then(|case| case.source_file_path.clone()),
            line: case.and_then(|case| case.source_line_number),
            message: details.message,
            trace: details.trace,
            tags: traits.get(CATEGORY_TRAIT).cloned(),
            attachments: Vec::new(),
            extra: CtrfTestExtra {
                id: ids.test.clone(),
                collection: ids.collection.clone(),
                class: cache
                    .class(ids.class.as_deref())
                    .map(|class| class.class_name.clone()),
                method: cache
                    .method(ids.method.as_deref())
                    .map(|method| method.method_name.clone()),
                exception: details.exception,
                output: (!result.output.is_empty()).then(|| result.output.clone()),
                warnings: (!result.warnings().is_empty()).then(|| result.warnings().to_vec()),
                traits: (!traits.is_empty()).then_some(traits),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CtrfAttachment {
    name: String,
    content_type: String,
    path: Utf8PathBuf,
}

#[derive(Debug, Serialize)]
struct CtrfTestExtra {
    id: String,
    collection: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traits: Option<Traits>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fs::FileSystem,
        messages::{CaseStarting, TestAttachment, TestStarting},
        test_helpers::*,
    };
    use camino::Utf8Path;
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use test_strategy::proptest;

    fn run(context: WriterContext, messages: &[TestMessage]) -> Value {
        let buffer = SharedBuffer::default();
        let mut writer = CtrfWriter::new(buffer.clone(), context);
        run_writer(&mut writer, messages);
        parse_json(&buffer)
    }

    fn run_default(messages: &[TestMessage]) -> Value {
        run(test_context().0, messages)
    }

    #[test]
    fn core_data() {
        let root = run(test_context_with_identity().0, &[]);

        assert_eq!(root["reportFormat"], "CTRF");
        assert_eq!(root["specVersion"], "0.0.0");
        assert_eq!(root["generatedBy"], GENERATED_BY);
        root["reportId"]
            .as_str()
            .expect("reportId is a string")
            .parse::<CtrfReportUuid>()
            .expect("reportId is a UUID");
        NaiveDateTime::parse_from_str(
            root["timestamp"].as_str().expect("timestamp is a string"),
            "%Y-%m-%dT%H:%M:%SZ",
        )
        .expect("timestamp has second precision and a Z suffix");

        let results = &root["results"];
        assert_eq!(
            results["tool"],
            json!({ "name": "xUnit.net v3", "version": TOOL_VERSION })
        );
        assert_eq!(
            results["environment"],
            json!({ "osPlatform": "Linux", "osRelease": "Ubuntu 24.04 LTS" })
        );
        assert_eq!(
            results["extra"],
            json!({ "computer": "expected-computer", "user": "expected-user", "suites": [] })
        );
        assert_eq!(
            results["summary"],
            json!({
                "tests": 0, "passed": 0, "failed": 0, "pending": 0, "skipped": 0,
                "other": 0, "suites": 0, "start": 0, "stop": 0,
            })
        );
        assert_eq!(results["tests"], json!([]));
    }

    #[test]
    fn identity_is_omitted_when_unresolved() {
        let root = run_default(&[]);
        let extra = root["results"]["extra"]
            .as_object()
            .expect("extra is an object");
        assert!(!extra.contains_key("computer"));
        assert!(!extra.contains_key("user"));
    }

    #[test]
    fn multiple_assemblies() {
        let root = run_default(&[
            assembly_starting_for("asm1", "asm1.dll", 0),
            assembly_finished_for("asm1", summary(2112, 42, 6, 3, EXECUTION_TIME)),
            assembly_starting_for("asm2", "asm2.dll", 1),
            assembly_finished_for("asm2", summary(5, 0, 0, 0, Duration::from_millis(1230))),
        ]);

        let start = start_time().timestamp_millis();
        let stop = finish_time().timestamp_millis();
        assert_eq!(
            root["results"]["summary"],
            json!({
                "tests": 2117, "passed": 2066, "failed": 42, "pending": 3, "skipped": 6,
                "other": 0, "suites": 2, "start": start, "stop": stop,
            })
        );

        let suites = &root["results"]["extra"]["suites"];
        assert_eq!(
            suites[0],
            json!({
                "id": "asm1",
                "filePath": "asm1.dll",
                "configPath": CONFIG_PATH,
                "environment": TEST_ENVIRONMENT,
                "testFramework": TEST_FRAMEWORK,
                "targetFramework": TARGET_FRAMEWORK,
                "start": start,
                "stop": stop,
                "duration": 123456,
                "collections": [],
                "errors": [],
            })
        );
        assert_eq!(suites[1]["id"], "asm2");
        assert_eq!(suites[1]["start"], start + 1000);
        assert_eq!(suites[1]["duration"], 1230);
    }

    #[test]
    fn suites_are_ordered_by_id() {
        let root = run_default(&[
            assembly_starting_for("zzz", "z.dll", 0),
            assembly_starting_for("aaa", "a.dll", 0),
        ]);
        let ids: Vec<_> = root["results"]["extra"]["suites"]
            .as_array()
            .expect("suites is an array")
            .iter()
            .map(|suite| suite["id"].as_str().expect("id is a string").to_owned())
            .collect();
        assert_eq!(ids, vec!["aaa", "zzz"]);
    }

    #[test]
    fn test_results() {
        let exact = Duration::from_nanos(123_456_780_900);
        let cases = [
            ResultCase {
                comment: "passed",
                result: test_passed(exact, "test output"),
                expected: json!({
                    "status": "passed",
                    "duration": 123456,
                }),
                extra: json!({ "output": "test output" }),
            },
            ResultCase {
                comment: "failed",
                result: test_failed(exact, ""),
                expected: json!({
                    "status": "failed",
                    "duration": 123456,
                    "message": COMBINED_MESSAGE,
                    "trace": STACK_TRACE,
                }),
                extra: json!({ "exception": EXCEPTION_TYPE }),
            },
            ResultCase {
                comment: "skipped",
                result: test_skipped("Don't run me"),
                expected: json!({
                    "status": "skipped",
                    "duration": 0,
                    "message": "Don't run me",
                }),
                extra: json!({}),
            },
            ResultCase {
                comment: "not run",
                result: test_not_run(),
                expected: json!({
                    "status": "pending",
                    "duration": 0,
                }),
                extra: json!({}),
            },
        ];

        for case in cases {
            eprintln!("** testing: {}", case.comment);
            let root = run_default(&single_test_run(case.result, default_summary()));

            let suite = &root["results"]["extra"]["suites"][0];
            assert_eq!(
                suite["collections"],
                json!([{ "id": COLLECTION_ID, "name": COLLECTION_DISPLAY_NAME }])
            );

            let mut expected = json!({
                "name": TEST_DISPLAY_NAME,
                "suite": ASSEMBLY_ID,
                "extra": {
                    "id": TEST_ID,
                    "collection": COLLECTION_ID,
                    "type": CLASS_NAME,
                    "method": METHOD_NAME,
                },
            });
            merge(&mut expected, case.expected);
            merge(&mut expected["extra"], case.extra);
            assert_eq!(root["results"]["tests"], json!([expected]), "{}", case.comment);
        }
    }

    #[test]
    fn source_information_and_traits() {
        let case = TestMessage::CaseStarting(CaseStarting {
            source_file_path: Some("/src/tests.cs".to_owned()),
            source_line_number: Some(42),
            ..default_case_starting()
        });
        let mut traits = Traits::new();
        traits.insert(
            CATEGORY_TRAIT.to_owned(),
            vec!["fast".to_owned(), "unit".to_owned()],
        );
        traits.insert("Owner".to_owned(), vec!["me".to_owned()]);
        let test = TestMessage::TestStarting(TestStarting {
            traits,
            ..default_test_starting()
        });

        let root = run_default(&[
            assembly_starting(),
            collection_starting(),
            case,
            test,
            test_passed_with_warnings("", &["careful"]),
            test_finished(),
        ]);

        let test = &root["results"]["tests"][0];
        assert_eq!(test["filePath"], "/src/tests.cs");
        assert_eq!(test["line"], 42);
        assert_eq!(test["tags"], json!(["fast", "unit"]));
        assert_eq!(
            test["extra"]["traits"],
            json!({ "Category": ["fast", "unit"], "Owner": ["me"] })
        );
        assert_eq!(test["extra"]["warnings"], json!(["careful"]));
        // Class and method never started, so they're left out.
        assert!(test["extra"].get("type").is_none());
        assert!(test["extra"].get("method").is_none());
    }

    #[test]
    fn unknown_test_and_first_result_only() {
        let root = run_default(&[
            assembly_starting(),
            test_passed(EXECUTION_TIME, ""),
            test_failed(EXECUTION_TIME, ""),
        ]);
        let tests = root["results"]["tests"]
            .as_array()
            .expect("tests is an array");
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0]["name"], UNKNOWN_TEST);
        assert_eq!(tests[0]["status"], "passed");
    }

    #[test]
    fn first_collection_only() {
        let mut second = default_collection_starting();
        second.ids.collection = "second-collection".to_owned();
        let root = run_default(&[
            assembly_starting(),
            collection_starting(),
            TestMessage::CollectionStarting(second),
        ]);
        assert_eq!(
            root["results"]["extra"]["suites"][0]["collections"],
            json!([{ "id": COLLECTION_ID, "name": COLLECTION_DISPLAY_NAME }])
        );
    }

    #[test]
    fn errors() {
        let cases = [
            (error_message(), "fatal", None),
            (assembly_cleanup_failure(), "assembly-cleanup", Some(ASSEMBLY_PATH)),
            (
                collection_cleanup_failure(),
                "test-collection-cleanup",
                Some(COLLECTION_DISPLAY_NAME),
            ),
            (class_cleanup_failure(), "test-class-cleanup", Some(CLASS_NAME)),
            (method_cleanup_failure(), "test-method-cleanup", Some(METHOD_NAME)),
            (case_cleanup_failure(), "test-case-cleanup", Some(CASE_DISPLAY_NAME)),
            (test_cleanup_failure(), "test-cleanup", Some(TEST_DISPLAY_NAME)),
        ];

        for (error, kind, name) in cases {
            eprintln!("** testing: {kind}");
            let root = run_default(&[
                assembly_starting(),
                collection_starting(),
                class_starting(),
                method_starting(),
                case_starting(),
                test_starting(),
                error,
            ]);

            let mut expected = json!({
                "type": kind,
                "exception": EXCEPTION_TYPE,
                "message": COMBINED_MESSAGE,
                "trace": STACK_TRACE,
            });
            if let Some(name) = name {
                expected["name"] = json!(name);
            }
            let suite = &root["results"]["extra"]["suites"][0];
            assert_eq!(suite["errors"], json!([expected]));
            // Errors aren't counted as tests.
            assert_eq!(root["results"]["summary"]["other"], 0);
        }
    }

    #[test]
    fn attachments() {
        let (context, fs) = test_context();
        let mut attachments = IndexMap::new();
        attachments.insert(
            "log".to_owned(),
            TestAttachment::String("Hello from a string attachment".to_owned()),
        );
        attachments.insert(
            "image".to_owned(),
            TestAttachment::ByteArray {
                bytes: vec![137, 80, 78, 71],
                media_type: "image/png".to_owned(),
            },
        );

        let root = run(
            context,
            &[
                assembly_starting(),
                test_starting(),
                test_passed(EXECUTION_TIME, ""),
                test_finished_with_attachments(attachments),
            ],
        );

        assert_eq!(
            root["results"]["tests"][0]["attachments"],
            json!([
                {
                    "name": "log",
                    "contentType": "text/plain",
                    "path": "/attachments/test-id/log.txt",
                },
                {
                    "name": "image",
                    "contentType": "image/png",
                    "path": "/attachments/test-id/image.png",
                },
            ])
        );
        assert_eq!(
            fs.read_all_text(Utf8Path::new("/attachments/test-id/log.txt"))
                .expect("attachment written"),
            "Hello from a string attachment"
        );
        assert_eq!(
            fs.read_all_bytes(Utf8Path::new("/attachments/test-id/image.png"))
                .expect("attachment written"),
            vec![137, 80, 78, 71]
        );
    }

    #[test]
    fn attachment_write_fault_is_returned_from_dispose() {
        let buffer = SharedBuffer::default();
        let context = test_context_with_fs(Arc::new(FullFileSystem));
        let mut writer = CtrfWriter::new(buffer.clone(), context);
        handle_all(
            &mut writer,
            &[
                assembly_starting(),
                test_starting(),
                test_passed(EXECUTION_TIME, ""),
                test_finished_with_attachments(IndexMap::from([(
                    "log".to_owned(),
                    TestAttachment::String("data".to_owned()),
                )])),
            ],
        );

        let error = writer.dispose().expect_err("attachment write failed");
        assert!(
            matches!(&error, WriteError::Fs { file, .. } if file == "/attachments/test-id"),
            "unexpected error: {error:?}"
        );
        assert_eq!(buffer.contents(), "", "no report is written");
        writer.dispose().expect("second dispose is a no-op");
    }

    #[proptest]
    fn summary_passed_invariant(
        #[strategy(prop::collection::vec(summary_strategy(), 0..6))] summaries: Vec<
            ExecutionSummary,
        >,
    ) {
        let mut messages = Vec::new();
        for (idx, summary) in summaries.iter().enumerate() {
            let id = format!("asm{idx}");
            messages.push(assembly_starting_for(&id, "asm.dll", idx as i64));
            messages.push(assembly_finished_for(&id, *summary));
        }
        let root = run_default(&messages);

        let summary = &root["results"]["summary"];
        let get = |key: &str| summary[key].as_u64().expect("count is a number");
        prop_assert_eq!(
            get("passed"),
            get("tests") - get("failed") - get("pending") - get("skipped")
        );
        prop_assert_eq!(get("suites"), summaries.len() as u64);
        prop_assert_eq!(
            get("tests"),
            summaries.iter().map(|s| s.total as u64).sum::<u64>()
        );
    }

    fn merge(target: &mut Value, source: Value) {
        let (Some(target), Value::Object(source)) = (target.as_object_mut(), source) else {
            panic!("both values are objects");
        };
        target.extend(source);
    }

    struct ResultCase {
        comment: &'static str,
        result: TestMessage,
        expected: Value,
        extra: Value,
    }
}
