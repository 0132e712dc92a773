// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Legacy xUnit XML reports (v1), where tests are grouped by class rather than by collection.

use super::{
    OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop,
    xml_v2::failure_element,
};
use crate::{
    errors::WriteError,
    helpers::{escape_xunit, seconds_decimal, seconds_f3},
    messages::{
        AssemblyFinished, AssemblyStarting, ClassIds, ClassStarting, ExecutionSummary,
        FailureInfo, ScopeFinished, TestMessage, TestResultInfo,
    },
    metadata::{AssemblyArena, MetadataCache},
};
use indexmap::IndexMap;
use report_xml::XmlElement;
use std::{io, mem};
use tracing::trace;

/// Results without a class ID are grouped under this key.
const NO_TEST_CLASS: &str = "<no-test-class>";

/// Writes a legacy xUnit XML (v1) report.
#[derive(Debug)]
pub struct XmlV1Writer<W: io::Write> {
    sink: ReportSink<W>,
    cache: MetadataCache,
    assemblies: AssemblyArena<XmlV1Assembly>,
}

#[derive(Debug)]
struct XmlV1Assembly {
    element: XmlElement,
    classes: IndexMap<String, XmlElement>,
}

#[derive(Clone, Copy, Debug)]
enum XunitOutcome<'a> {
    Pass,
    Fail(&'a FailureInfo),
    Skip(&'a str),
}

impl<W: io::Write> XmlV1Writer<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    ///
    /// The v1 format doesn't record anything about the host, so the context is unused.
    pub fn new(output: W, _context: WriterContext) -> Self {
        Self {
            sink: ReportSink::new(ResultFormat::XmlV1, output),
            cache: MetadataCache::new(),
            assemblies: AssemblyArena::new(),
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
            .set_attribute(
                "name",
                starting.assembly_path.as_deref().unwrap_or("<dynamic>"),
            )
            .set_attribute("run-date", starting.start_time.format("%Y-%m-%d").to_string())
            .set_attribute("run-time", starting.start_time.format("%H:%M:%S").to_string())
            .set_attribute("test-framework", &starting.test_framework_display_name)
            .set_attribute_opt("configFile", starting.config_file_path.as_deref());

        self.assemblies
            .get_or_insert_with(&starting.assembly_unique_id, |_| XmlV1Assembly {
                element,
                classes: IndexMap::new(),
            });
    }

    fn assembly_finished(&mut self, finished: &AssemblyFinished) {
        let id = &finished.assembly_unique_id;
        let Some(entry) = self.assemblies.get_mut(id) else {
            trace!("ignoring finish of unknown assembly `{id}`");
            return;
        };
        let assembly = &mut entry.data;

        set_summary(&mut assembly.element, &finished.summary);
        let classes = mem::take(&mut assembly.classes);
        assembly.element.add_children(classes.into_values());
    }

    fn class_mut(
        &mut self,
        assembly_unique_id: &str,
        class: Option<&str>,
    ) -> Option<&mut XmlElement> {
        let Some(entry) = self.assemblies.get_mut(assembly_unique_id) else {
            trace!("ignoring class in unknown assembly `{assembly_unique_id}`");
            return None;
        };
        Some(
            entry
                .data
                .classes
                .entry(class.unwrap_or(NO_TEST_CLASS).to_owned())
                .or_insert_with(|| XmlElement::new("class")),
        )
    }

    fn class_starting(&mut self, starting: &ClassStarting) {
        let ids = &starting.ids;
        if let Some(class) = self.class_mut(&ids.assembly, Some(ids.class.as_str())) {
            class.set_attribute("name", escape_xunit(&starting.class_name, true));
        }
    }

    fn class_finished(&mut self, finished: &ScopeFinished<ClassIds>) {
        let ids = &finished.ids;
        if let Some(class) = self.class_mut(&ids.assembly, Some(ids.class.as_str())) {
            set_summary(class, &finished.summary);
        }
    }

    fn record_test(&mut self, result: &TestResultInfo, outcome: XunitOutcome<'_>) {
        let ids = &result.ids;
        let (Some(test), Some(case)) = (self.cache.test(&ids.test), self.cache.case(&ids.case))
        else {
            trace!("ignoring result for test `{}` with unknown metadata", ids.test);
            return;
        };

        let mut element = XmlElement::new("test");
        element
            .set_attribute("name", escape_xunit(&test.display_name, true))
            .set_attribute(
                "result",
                match outcome {
                    XunitOutcome::Pass => "Pass",
                    XunitOutcome::Fail(_) => "Fail",
                    XunitOutcome::Skip(_) => "Skip",
                },
            )
            .set_attribute("time", seconds_decimal(result.execution_time))
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
            );

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
                element.add_child(
                    XmlElement::new("reason").with_child(
                        XmlElement::new("message").with_text(escape_xunit(reason, false)),
                    ),
                );
            }
            XunitOutcome::Pass => {}
        }

        if let Some(class) = self.class_mut(&ids.assembly, ids.class.as_deref()) {
            class.add_child(element);
        }
    }
}

impl<W: io::Write> ResultWriter for XmlV1Writer<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => self.assembly_starting(starting),
            TestMessage::AssemblyFinished(finished) => self.assembly_finished(finished),
            TestMessage::ClassStarting(starting) => self.class_starting(starting),
            TestMessage::ClassFinished(finished) => self.class_finished(finished),
            TestMessage::TestPassed(result) => self.record_test(result, XunitOutcome::Pass),
            TestMessage::TestFailed(failed) => {
                self.record_test(&failed.result, XunitOutcome::Fail(&failed.failure))
            }
            TestMessage::TestSkipped(skipped) => {
                self.record_test(&skipped.result, XunitOutcome::Skip(&skipped.reason))
            }
            // The v1 format has no representation for these.
            TestMessage::TestNotRun(_)
            | TestMessage::ErrorMessage(_)
            | TestMessage::AssemblyCleanupFailure(_)
            | TestMessage::CollectionCleanupFailure(_)
            | TestMessage::ClassCleanupFailure(_)
            | TestMessage::MethodCleanupFailure(_)
            | TestMessage::CaseCleanupFailure(_)
            | TestMessage::TestCleanupFailure(_) => {}
            TestMessage::CollectionStarting(_)
            | TestMessage::CollectionFinished(_)
            | TestMessage::MethodStarting(_)
            | TestMessage::MethodFinished(_)
            | TestMessage::CaseStarting(_)
            | TestMessage::CaseFinished(_)
            | TestMessage::TestStarting(_)
            | TestMessage::TestFinished(_) => {}
        }

        self.cache.evict(message);
        true
    }

    fn dispose(&mut self) -> Result<(), WriteError> {
        let assemblies = &self.assemblies;
        self.sink.finish_xml(|| {
            XmlElement::new("assemblies").with_children(
                assemblies
                    .iter()
                    .map(|(_, entry)| entry.data.element.clone()),
            )
        })
    }
}

impl<W: io::Write> Drop for XmlV1Writer<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::XmlV1);
    }
}

fn set_summary(element: &mut XmlElement, summary: &ExecutionSummary) {
    element
        .set_attribute("failed", summary.failed.to_string())
        .set_attribute("passed", summary.passed().to_string())
        .set_attribute("skipped", summary.skipped.to_string())
        .set_attribute("time", seconds_f3(summary.execution_time))
        .set_attribute("total", summary.total.to_string());
}
