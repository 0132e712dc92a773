// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Visual Studio test results (TRX) reports.
//!
//! A TRX document lists every test three times: once as a `UnitTestResult`, once as a
//! `UnitTest` definition and once as a `TestEntry`. The three are tied together by a GUID that
//! is generated the first time a test is seen.

use super::{OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop};
use crate::{
    attachments::AttachmentMaterializer,
    errors::WriteError,
    exception::{combine_messages, combine_stack_traces},
    helpers::{min_date_time, non_blank, rtf, timespan_rtf, trim_trailing_newlines},
    messages::{FailureInfo, TestFinished, TestMessage, TestResultInfo},
    metadata::{AssemblyArena, MetadataCache, RunTotals},
};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use report_xml::XmlElement;
use std::{collections::HashMap, io, time::Duration};
use tracing::trace;

/// The kind for TRX test run IDs.
pub enum TrxRunKind {}

impl TypedUuidKind for TrxRunKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("trx_run");
        TAG
    }
}

/// The unique ID of a TRX test run.
pub type TrxRunUuid = TypedUuid<TrxRunKind>;

/// The kind for TRX test IDs, shared by a test's result, definition and entry.
pub enum TrxTestKind {}

impl TypedUuidKind for TrxTestKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("trx_test");
        TAG
    }
}

/// The unique ID of a test within a TRX report.
pub type TrxTestUuid = TypedUuid<TrxTestKind>;

const NAMESPACE: &str = "http://microsoft.com/schemas/VisualStudio/TeamTest/2010";
const TEST_SETTINGS_ID: &str = "6c4d5628-128d-4c3b-a1a4-ab366a4594ad";
const RESULTS_NOT_IN_A_LIST_ID: &str = "8c84fa94-04c1-424b-9868-57a2d4851a1d";
const ALL_LOADED_RESULTS_ID: &str = "19431567-8539-422a-85d7-44ee4e166bda";
const UNIT_TEST_TYPE: &str = "13cdc9d9-ddb5-4fa4-a97d-d965ccfc6d4b";
const UNKNOWN: &str = "unknown";

/// Writes a TRX report.
#[derive(Debug)]
pub struct TrxWriter<W: io::Write> {
    sink: ReportSink<W>,
    context: WriterContext,
    materializer: AttachmentMaterializer,
    cache: MetadataCache,
    assemblies: AssemblyArena<TrxAssembly>,
    run_id: TrxRunUuid,
    results: Vec<XmlElement>,
    definitions: Vec<XmlElement>,
    entries: Vec<XmlElement>,
    totals: RunTotals,
}

#[derive(Debug, Default)]
struct TrxAssembly {
    test_ids: HashMap<String, TrxTestUuid>,
    // Position in `results` of each result whose test hasn't finished yet.
    open_results: HashMap<String, usize>,
}

#[derive(Clone, Copy, Debug)]
enum TrxOutcome<'a> {
    Passed,
    Failed(&'a FailureInfo),
    NotExecuted(&'a str),
    NotRunnable,
}

impl TrxOutcome<'_> {
    fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "Passed",
            Self::Failed(_) => "Failed",
            Self::NotExecuted(_) => "NotExecuted",
            Self::NotRunnable => "NotRunnable",
        }
    }
}

impl<W: io::Write> TrxWriter<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    pub fn new(output: W, context: WriterContext) -> Self {
        Self {
            sink: ReportSink::new(ResultFormat::Trx, output),
            materializer: context.attachment_materializer(),
            context,
            cache: MetadataCache::new(),
            assemblies: AssemblyArena::new(),
            run_id: TrxRunUuid::new_v4(),
            results: Vec::new(),
            definitions: Vec::new(),
            entries: Vec::new(),
            totals: RunTotals::new(),
        }
    }

    /// Registers a callback that receives the rendered report after it has been written.
    pub fn on_disposed(mut self, callback: OnDisposed) -> Self {
        self.sink.set_on_disposed(callback);
        self
    }

    fn record_test(&mut self, result: &TestResultInfo, outcome: TrxOutcome<'_>) {
        let ids = &result.ids;
        let Some(entry) = self.assemblies.get_mut(&ids.assembly) else {
            trace!(
                "ignoring result for test `{}` in unknown assembly `{}`",
                ids.test, ids.assembly
            );
            return;
        };
        let Some(test) = self.cache.test(&ids.test) else {
            trace!("ignoring result for unknown test `{}`", ids.test);
            return;
        };
        let assembly = &mut entry.data;
        let test_id = assembly
            .test_ids
            .entry(ids.test.clone())
            .or_insert_with(TrxTestUuid::new_v4)
            .to_string();

        let duration = match outcome {
            TrxOutcome::Passed | TrxOutcome::Failed(_) => result.execution_time,
            TrxOutcome::NotExecuted(_) | TrxOutcome::NotRunnable => Duration::ZERO,
        };
        let mut result_element = XmlElement::new("UnitTestResult")
            .with_attribute("testName", &test.display_name)
            .with_attribute("outcome", outcome.as_str())
            .with_attribute("testType", UNIT_TEST_TYPE)
            .with_attribute("testListId", RESULTS_NOT_IN_A_LIST_ID)
            .with_attribute("testId", &test_id)
            .with_attribute("executionId", &test_id)
            .with_attribute("computerName", self.context.host().computer_or(UNKNOWN))
            .with_attribute("duration", timespan_rtf(duration))
            .with_attribute("startTime", rtf(&test.start_time))
            .with_attribute("endTime", rtf(&result.finish_time));

        let mut output = XmlElement::new("Output");
        if let Some(text) = non_blank(&result.output) {
            output.add_child(XmlElement::new("TextMessages").with_children(
                trim_trailing_newlines(text)
                    .split("\r\n")
                    .map(|line| XmlElement::new("Message").with_text(line)),
            ));
        }
        match outcome {
            TrxOutcome::Failed(failure) => {
                let mut error_info = XmlElement::new("ErrorInfo");
                let message = combine_messages(failure);
                if let Some(message) = non_blank(&message) {
                    error_info.add_child(XmlElement::new("Message").with_text(message));
                }
                if let Some(stack_trace) = combine_stack_traces(failure)
                    .as_deref()
                    .and_then(non_blank)
                {
                    error_info.add_child(XmlElement::new("StackTrace").with_text(stack_trace));
                }
                output.add_child(error_info);
            }
            TrxOutcome::NotExecuted(reason) => {
                output.add_child(XmlElement::new("StdOut").with_text(reason));
            }
            TrxOutcome::Passed | TrxOutcome::NotRunnable => {}
        }
        if output.children().next().is_some() {
            result_element.add_child(output);
        }

        assembly
            .open_results
            .insert(ids.test.clone(), self.results.len());
        self.results.push(result_element);

        // The definition needs the assembly path, which is only known while the assembly runs.
        if let Some(starting) = self.cache.assembly(&ids.assembly) {
            let storage = starting.assembly_path.as_deref().unwrap_or_default();
            let mut unit_test = XmlElement::new("UnitTest")
                .with_attribute("name", &test.display_name)
                .with_attribute("id", &test_id)
                .with_attribute("storage", storage)
                .with_child(XmlElement::new("Execution").with_attribute("id", &test_id));

            let class = self.cache.class(ids.class.as_deref());
            let method = self.cache.method(ids.method.as_deref());
            if let (Some(class), Some(method)) = (class, method) {
                unit_test.add_child(
                    XmlElement::new("TestMethod")
                        .with_attribute("codeBase", storage)
                        .with_attribute("className", &class.class_name)
                        .with_attribute("name", &method.method_name)
                        .with_attribute(
                            "adapterTypeName",
                            format!(
                                "executor://{}/xunit.v3/{}",
                                self.run_id,
                                self.context.config().tool_version()
                            ),
                        ),
                );
            }
            self.definitions.push(unit_test);
        }

        self.entries.push(
            XmlElement::new("TestEntry")
                .with_attribute("testListId", RESULTS_NOT_IN_A_LIST_ID)
                .with_attribute("testId", &test_id)
                .with_attribute("executionId", test_id),
        );
    }

    fn test_finished(&mut self, finished: &TestFinished) {
        let ids = &finished.result.ids;
        let Some(entry) = self.assemblies.get_mut(&ids.assembly) else {
            trace!("ignoring finish of test `{}` in unknown assembly", ids.test);
            return;
        };
        entry.data.test_ids.remove(&ids.test);
        let Some(position) = entry.data.open_results.remove(&ids.test) else {
            return;
        };
        if finished.attachments.is_empty() {
            return;
        }
        let Some(result_element) = self.results.get_mut(position) else {
            return;
        };

        let attachments = match self.materializer.materialize(&ids.test, &finished.attachments) {
            Ok(attachments) => attachments,
            Err(error) => {
                self.sink.defer_error(error);
                return;
            }
        };
        result_element.add_child(XmlElement::new("ResultFiles").with_children(
            attachments.into_iter().map(|attachment| {
                XmlElement::new("ResultFile").with_attribute("path", attachment.path.into_string())
            }),
        ));
    }

    fn render(&mut self) -> XmlElement {
        let host = self.context.host();
        let user = host.user_or(UNKNOWN);
        let totals = &self.totals;
        let summary = totals.summary();

        let finish = totals.finish_time().unwrap_or_else(min_date_time);
        // A run that never finished an assembly has no meaningful start either.
        let start = totals
            .finish_time()
            .and(totals.start_time())
            .unwrap_or(finish);
        let start_rtf = rtf(&start);
        let finish_rtf = rtf(&finish);

        let executed = summary
            .total
            .saturating_sub(summary.skipped + summary.not_run);
        let outcome = if totals.errors() + summary.failed > 0 {
            "Failed"
        } else {
            "Completed"
        };
        let counters = [
            ("total", summary.total),
            ("executed", executed),
            ("passed", summary.passed()),
            ("failed", summary.failed),
            ("error", totals.errors()),
            ("timeout", 0),
            ("aborted", 0),
            ("inconclusive", 0),
            ("passedButRunAborted", 0),
            ("notRunnable", summary.not_run),
            ("notExecuted", summary.skipped),
            ("disconnected", 0),
            ("warning", 0),
            ("completed", 0),
            ("inProgress", 0),
            ("pending", 0),
        ]
        .into_iter()
        .fold(XmlElement::new("Counters"), |counters, (name, value)| {
            counters.with_attribute(name, value.to_string())
        });

        XmlElement::new("TestRun")
            .with_attribute("xmlns", NAMESPACE)
            .with_attribute("id", self.run_id.to_string())
            .with_attribute(
                "name",
                format!("{user}@{} {start_rtf}", host.computer_or(UNKNOWN)),
            )
            .with_attribute("runUser", user)
            .with_child(
                XmlElement::new("Times")
                    .with_attribute("creation", &start_rtf)
                    .with_attribute("queuing", &start_rtf)
                    .with_attribute("start", &start_rtf)
                    .with_attribute("finish", finish_rtf),
            )
            .with_child(
                XmlElement::new("TestSettings")
                    .with_attribute("name", "default")
                    .with_attribute("id", TEST_SETTINGS_ID),
            )
            .with_child(XmlElement::new("Results").with_children(self.results.drain(..)))
            .with_child(
                XmlElement::new("TestDefinitions").with_children(self.definitions.drain(..)),
            )
            .with_child(XmlElement::new("TestEntries").with_children(self.entries.drain(..)))
            .with_child(
                XmlElement::new("TestLists")
                    .with_child(test_list("Results Not in a List", RESULTS_NOT_IN_A_LIST_ID))
                    .with_child(test_list("All Loaded Results", ALL_LOADED_RESULTS_ID)),
            )
            .with_child(
                XmlElement::new("ResultSummary")
                    .with_attribute("outcome", outcome)
                    .with_child(counters),
            )
    }
}

impl<W: io::Write> ResultWriter for TrxWriter<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => {
                self.assemblies
                    .get_or_insert_with(&starting.assembly_unique_id, |_| TrxAssembly::default());
                self.totals.observe_start(starting.start_time);
            }
            TestMessage::AssemblyFinished(finished) => {
                if self.assemblies.get(&finished.assembly_unique_id).is_some() {
                    self.totals.observe_finish(finished.finish_time);
                    self.totals.add_summary(&finished.summary);
                } else {
                    trace!(
                        "ignoring finish of unknown assembly `{}`",
                        finished.assembly_unique_id
                    );
                }
            }
            TestMessage::TestPassed(result) => self.record_test(result, TrxOutcome::Passed),
            TestMessage::TestFailed(failed) => {
                self.record_test(&failed.result, TrxOutcome::Failed(&failed.failure))
            }
            TestMessage::TestSkipped(skipped) => {
                self.record_test(&skipped.result, TrxOutcome::NotExecuted(&skipped.reason))
            }
            TestMessage::TestNotRun(result) => self.record_test(result, TrxOutcome::NotRunnable),
            TestMessage::TestFinished(finished) => self.test_finished(finished),
            // Errors are counted for the whole run, whichever scope they come from.
            TestMessage::ErrorMessage(_)
            | TestMessage::AssemblyCleanupFailure(_)
            | TestMessage::CollectionCleanupFailure(_)
            | TestMessage::ClassCleanupFailure(_)
            | TestMessage::MethodCleanupFailure(_)
            | TestMessage::CaseCleanupFailure(_)
            | TestMessage::TestCleanupFailure(_) => self.totals.add_errors(1),
            TestMessage::CollectionStarting(_)
            | TestMessage::CollectionFinished(_)
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
        if self.sink.is_disposed() {
            return Ok(());
        }
        let document = self.render();
        self.sink.finish_xml(|| document)
    }
}

impl<W: io::Write> Drop for TrxWriter<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::Trx);
    }
}

fn test_list(name: &str, id: &str) -> XmlElement {
    XmlElement::new("TestList")
        .with_attribute("name", name)
        .with_attribute("id", id)
}
