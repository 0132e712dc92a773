// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! xUnit XML reports (schema version 3).
//!
//! The root `assemblies` element holds one `assembly` per assembly that started. Tests are
//! grouped by collection, and assembly-level errors are kept in a lazily created `errors`
//! element.

use super::{OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop};
use crate::{
    errors::WriteError,
    exception::{combine_messages, combine_stack_traces_or_empty},
    helpers::{
        escape_xunit, is_blank, min_date_time, rtf, seconds_decimal, seconds_f3,
        timespan_constant, timespan_rtf,
    },
    messages::{
        AssemblyFinished, AssemblyStarting, CollectionIds, CollectionStarting, ExecutionSummary,
        FailureInfo, ScopeFinished, TestAttachment, TestFinished, TestMessage, TestResultInfo,
    },
    metadata::{AssemblyArena, MetadataCache, RunTotals},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use indexmap::IndexMap;
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use report_xml::XmlElement;
use std::{collections::HashMap, io, mem};
use tracing::trace;

/// The kind for IDs of elements in xUnit XML reports.
pub enum XunitXmlKind {}

impl TypedUuidKind for XunitXmlKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("xunit_xml");
        TAG
    }
}

/// An ID for the run, an assembly, a collection or a test in an xUnit XML report.
pub type XunitXmlUuid = TypedUuid<XunitXmlKind>;

/// Writes an xUnit XML (v2) report.
#[derive(Debug)]
pub struct XmlV2Writer<W: io::Write> {
    sink: ReportSink<W>,
    cache: MetadataCache,
    assemblies: AssemblyArena<XmlV2Assembly>,
    root: XmlElement,
    totals: RunTotals,
}

#[derive(Debug)]
struct XmlV2Assembly {
    element: XmlElement,
    collections: IndexMap<String, XmlV2Collection>,
    // Test ID to the collection key and position of its `test` element.
    open_tests: HashMap<String, (String, usize)>,
}

#[derive(Debug)]
struct XmlV2Collection {
    element: XmlElement,
    tests: Vec<XmlElement>,
}

impl Default for XmlV2Collection {
    fn default() -> Self {
        Self {
            element: XmlElement::new("collection"),
            tests: Vec::new(),
        }
    }
}

impl XmlV2Collection {
    fn into_element(self) -> XmlElement {
        self.element.with_children(self.tests)
    }
}

#[derive(Clone, Copy, Debug)]
enum XunitOutcome<'a> {
    Pass,
    Fail(&'a FailureInfo),
    Skip(&'a str),
    NotRun,
}

impl XunitOutcome<'_> {
    fn result_text(self) -> &'static str {
        match self {
            Self::Pass => "Pass",
            Self::Fail(_) => "Fail",
            Self::Skip(_) => "Skip",
            Self::NotRun => "NotRun",
        }
    }
}

impl<W: io::Write> XmlV2Writer<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    pub fn new(output: W, context: WriterContext) -> Self {
        let host = context.host();
        let mut root = XmlElement::new("assemblies");
        root.set_attribute("schema-version", "3")
            .set_attribute("id", XunitXmlUuid::new_v4().to_string())
            .set_attribute_opt("computer", host.computer.as_deref())
            .set_attribute_opt("user", host.user.as_deref());

        Self {
            sink: ReportSink::new(ResultFormat::XmlV2, output),
            cache: MetadataCache::new(),
            assemblies: AssemblyArena::new(),
            root,
            totals: RunTotals::new(),
        }
    }

    /// Registers a callback that receives the rendered report after it has been written.
    pub fn on_disposed(mut self, callback: OnDisposed) -> Self {
        self.sink.set_on_disposed(callback);
        self
    }

    fn assembly_starting(&mut self, starting: &AssemblyStarting) {
        let mut element = XmlElement::new("assembly");
        element
            .set_attribute("environment", &starting.test_environment)
            .set_attribute("id", XunitXmlUuid::new_v4().to_string())
            .set_attribute(
                "name",
                starting.assembly_path.as_deref().unwrap_or("<dynamic>"),
            )
            .set_attribute("run-date", starting.start_time.format("%Y-%m-%d").to_string())
            .set_attribute("run-time", starting.start_time.format("%H:%M:%S").to_string())
            .set_attribute("start-rtf", rtf(&starting.start_time))
            .set_attribute("test-framework", &starting.test_framework_display_name)
            .set_attribute_opt("config-file", starting.config_file_path.as_deref())
            .set_attribute_opt("target-framework", starting.target_framework.as_deref());

        self.totals.observe_start(starting.start_time);
        self.assemblies
            .get_or_insert_with(&starting.assembly_unique_id, |_| XmlV2Assembly {
                element,
                collections: IndexMap::new(),
                open_tests: HashMap::new(),
            });
    }

    fn assembly_finished(&mut self, finished: &AssemblyFinished) {
        let id = &finished.assembly_unique_id;
        let Some(entry) = self.assemblies.get_mut(id) else {
            trace!("ignoring finish of unknown assembly `{id}`");
            return;
        };
        let assembly = &mut entry.data;

        let errors = assembly
            .element
            .child("errors")
            .map_or(0, |errors| errors.children().count());
        assembly
            .element
            .set_attribute("errors", errors.to_string())
            .set_attribute("finish-rtf", rtf(&finished.finish_time));
        set_summary(&mut assembly.element, &finished.summary);

        let collections = mem::take(&mut assembly.collections);
        assembly
            .element
            .add_children(collections.into_values().map(XmlV2Collection::into_element));
        assembly.open_tests.clear();

        self.totals.observe_finish(finished.finish_time);
    }

    fn collection_mut(&mut self, ids: &CollectionIds) -> Option<&mut XmlV2Collection> {
        let Some(entry) = self.assemblies.get_mut(&ids.assembly) else {
            trace!(
                "ignoring collection `{}` in unknown assembly `{}`",
                ids.collection, ids.assembly
            );
            return None;
        };
        Some(
            entry
                .data
                .collections
                .entry(ids.collection.clone())
                .or_default(),
        )
    }

    fn collection_starting(&mut self, starting: &CollectionStarting) {
        if let Some(collection) = self.collection_mut(&starting.ids) {
            collection
                .element
                .set_attribute(
                    "name",
                    escape_xunit(&starting.collection_display_name, true),
                )
                .set_attribute("id", XunitXmlUuid::new_v4().to_string());
        }
    }

    fn collection_finished(&mut self, finished: &ScopeFinished<CollectionIds>) {
        if let Some(collection) = self.collection_mut(&finished.ids) {
            set_summary(&mut collection.element, &finished.summary);
        }
    }

    fn record_test(&mut self, result: &TestResultInfo, outcome: XunitOutcome<'_>) {
        let ids = &result.ids;
        let Some(entry) = self.assemblies.get_mut(&ids.assembly) else {
            trace!(
                "ignoring result for test `{}` in unknown assembly `{}`",
                ids.test, ids.assembly
            );
            return;
        };
        let (Some(test), Some(case)) = (self.cache.test(&ids.test), self.cache.case(&ids.case))
        else {
            trace!("ignoring result for test `{}` with unknown metadata", ids.test);
            return;
        };

        let mut element = XmlElement::new("test");
        element
            .set_attribute("id", XunitXmlUuid::new_v4().to_string())
            .set_attribute("name", escape_xunit(&test.display_name, true))
            .set_attribute("result", outcome.result_text())
            .set_attribute("time", seconds_decimal(result.execution_time))
            .set_attribute("time-rtf", timespan_rtf(result.execution_time))
            .set_attribute("start-rtf", rtf(&test.start_time))
            .set_attribute("finish-rtf", rtf(&result.finish_time))
            .set_attribute_opt(
                "type",
                self.cache
                    .class(ids.class.as_deref())
                    .map(|class| class.class_name.as_str()),
            )
            .set_attribute_opt(
                "method",
                self.cache
                    .method(ids.method.as_deref())
                    .map(|method| method.method_name.as_str()),
            )
            .set_attribute_opt("source-file", case.source_file_path.as_deref())
            .set_attribute_opt(
                "source-line",
                case.source_line_number.map(|line| line.to_string()),
            );

        if !is_blank(&result.output) {
            element.add_child(
                XmlElement::new("output").with_text(strip_ansi_escapes::strip_str(&result.output)),
            );
        }
        if !result.warnings().is_empty() {
            element.add_child(XmlElement::new("warnings").with_children(
                result
                    .warnings()
                    .iter()
                    .map(|warning| XmlElement::new("warning").with_text(warning)),
            ));
        }
        if !case.traits.is_empty() {
            element.add_child(XmlElement::new("traits").with_children(
                case.traits.iter().flat_map(|(name, values)| {
                    values.iter().map(move |value| {
                        XmlElement::new("trait")
                            .with_attribute("name", escape_xunit(name, true))
                            .with_attribute("value", escape_xunit(value, true))
                    })
                }),
            ));
        }

        match outcome {
            XunitOutcome::Fail(failure) => {
                element.add_child(failure_element(failure));
            }
            XunitOutcome::Skip(reason) => {
                element.add_child(XmlElement::new("reason").with_text(escape_xunit(reason, false)));
            }
            XunitOutcome::Pass | XunitOutcome::NotRun => {}
        }

        let assembly = &mut entry.data;
        let collection = assembly
            .collections
            .entry(ids.collection.clone())
            .or_default();
        let position = collection.tests.len();
        collection.tests.push(element);
        assembly
            .open_tests
            .insert(ids.test.clone(), (ids.collection.clone(), position));
    }

    fn test_finished(&mut self, finished: &TestFinished) {
        let ids = &finished.result.ids;
        let Some(entry) = self.assemblies.get_mut(&ids.assembly) else {
            trace!("ignoring finish of test `{}` in unknown assembly", ids.test);
            return;
        };
        let assembly = &mut entry.data;
        let Some((collection, position)) = assembly.open_tests.remove(&ids.test) else {
            return;
        };
        if finished.attachments.is_empty() {
            return;
        }
        let Some(test) = assembly
            .collections
            .get_mut(&collection)
            .and_then(|collection| collection.tests.get_mut(position))
        else {
            return;
        };

        test.add_child(XmlElement::new("attachments").with_children(
            finished
                .attachments
                .iter()
                .map(|(name, attachment)| attachment_element(name, attachment)),
        ));
    }

    fn record_error(
        &mut self,
        assembly_unique_id: &str,
        error_type: &str,
        name: Option<String>,
        failure: &FailureInfo,
    ) {
        let Some(entry) = self.assemblies.get_mut(assembly_unique_id) else {
            trace!("ignoring {error_type} error for unknown assembly `{assembly_unique_id}`");
            return;
        };

        let mut error = XmlElement::new("error");
        error
            .set_attribute("type", error_type)
            .set_attribute_opt("name", name)
            .add_child(failure_element(failure));
        entry.data.element.child_or_insert("errors").add_child(error);
    }
}

impl<W: io::Write> ResultWriter for XmlV2Writer<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => self.assembly_starting(starting),
            TestMessage::AssemblyFinished(finished) => self.assembly_finished(finished),
            TestMessage::CollectionStarting(starting) => self.collection_starting(starting),
            TestMessage::CollectionFinished(finished) => self.collection_finished(finished),
            TestMessage::TestPassed(result) => self.record_test(result, XunitOutcome::Pass),
            TestMessage::TestFailed(failed) => {
                self.record_test(&failed.result, XunitOutcome::Fail(&failed.failure))
            }
            TestMessage::TestSkipped(skipped) => {
                self.record_test(&skipped.result, XunitOutcome::Skip(&skipped.reason))
            }
            TestMessage::TestNotRun(result) => self.record_test(result, XunitOutcome::NotRun),
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
                    .class(Some(m.ids.class.as_str()))
                    .map(|class| class.class_name.clone());
                self.record_error(&m.ids.assembly, "test-class-cleanup", name, &m.failure);
            }
            TestMessage::MethodCleanupFailure(m) => {
                let name = self
                    .cache
                    .method(Some(m.ids.method.as_str()))
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
            TestMessage::ClassStarting(_)
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
        let start = self.totals.start_time().unwrap_or_else(min_date_time);
        let finish = self.totals.finish_time().unwrap_or_else(min_date_time);
        let root = &self.root;
        let assemblies = &self.assemblies;
        self.sink.finish_xml(|| {
            root.clone()
                .with_attribute("start-rtf", rtf(&start))
                .with_attribute("finish-rtf", rtf(&finish))
                .with_attribute("timestamp", finish.format("%m/%d/%Y %H:%M:%S").to_string())
                .with_children(
                    assemblies
                        .iter()
                        .map(|(_, entry)| entry.data.element.clone()),
                )
        })
    }
}

impl<W: io::Write> Drop for XmlV2Writer<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::XmlV2);
    }
}

/// Builds the `failure` element shared by both xUnit XML formats.
pub(super) fn failure_element(failure: &FailureInfo) -> XmlElement {
    let mut element = XmlElement::new("failure");
    element
        .set_attribute_opt("exception-type", failure.first_exception_type())
        .add_child(
            XmlElement::new("message").with_cdata(escape_xunit(&combine_messages(failure), false)),
        )
        .add_child(XmlElement::new("stack-trace").with_cdata(escape_xunit(
            &combine_stack_traces_or_empty(failure),
            false,
        )));
    element
}

// Counts and times shared by the assembly and collection elements.
fn set_summary(element: &mut XmlElement, summary: &ExecutionSummary) {
    element
        .set_attribute("failed", summary.failed.to_string())
        .set_attribute("not-run", summary.not_run.to_string())
        .set_attribute("passed", summary.passed().to_string())
        .set_attribute("skipped", summary.skipped.to_string())
        .set_attribute("time", seconds_f3(summary.execution_time))
        .set_attribute("time-rtf", timespan_constant(summary.execution_time))
        .set_attribute("total", summary.total.to_string());
}

fn attachment_element(name: &str, attachment: &TestAttachment) -> XmlElement {
    let element = XmlElement::new("attachment").with_attribute("name", name);
    match attachment {
        TestAttachment::String(value) => element.with_text(value),
        TestAttachment::ByteArray { bytes, media_type } => element
            .with_attribute("media-type", media_type)
            .with_text(STANDARD.encode(bytes)),
    }
}
