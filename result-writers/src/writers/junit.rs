// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JUnit XML reports.
//!
//! The layout follows the Jenkins JUnit schema: a `testsuites` root, one `testsuite` per assembly,
//! and one `testcase` per test that ran. Tests that weren't run are left out.

use super::{OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop};
use crate::{
    errors::WriteError,
    exception::{combine_messages, combine_stack_traces},
    helpers::{min_date_time, non_blank, output_and_warnings, seconds_f6, utc_sortable},
    messages::{AssemblyFinished, FailureInfo, TestMessage, TestResultInfo},
    metadata::{AssemblyArena, MetadataCache, RunTotals},
};
use report_xml::XmlElement;
use std::{io, mem};
use tracing::trace;

/// Writes a JUnit XML report.
#[derive(Debug)]
pub struct JunitWriter<W: io::Write> {
    sink: ReportSink<W>,
    context: WriterContext,
    cache: MetadataCache,
    assemblies: AssemblyArena<JunitAssembly>,
    suites: Vec<XmlElement>,
    totals: RunTotals,
}

#[derive(Debug)]
struct JunitAssembly {
    element: XmlElement,
    errors: Vec<(String, Option<String>)>,
}

impl Default for JunitAssembly {
    fn default() -> Self {
        Self {
            element: XmlElement::new("testsuite"),
            errors: Vec::new(),
        }
    }
}

impl<W: io::Write> JunitWriter<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    pub fn new(output: W, context: WriterContext) -> Self {
        Self {
            sink: ReportSink::new(ResultFormat::Junit, output),
            context,
            cache: MetadataCache::new(),
            assemblies: AssemblyArena::new(),
            suites: Vec::new(),
            totals: RunTotals::new(),
        }
    }

    /// Registers a callback that receives the rendered report after it has been written.
    pub fn on_disposed(mut self, callback: OnDisposed) -> Self {
        self.sink.set_on_disposed(callback);
        self
    }

    fn record_error(&mut self, assembly_unique_id: &str, failure: &FailureInfo) {
        let Some(entry) = self.assemblies.get_mut(assembly_unique_id) else {
            trace!("ignoring error for unknown assembly `{assembly_unique_id}`");
            return;
        };
        entry
            .data
            .errors
            .push((combine_messages(failure), combine_stack_traces(failure)));
    }

    fn record_test_case(&mut self, result: &TestResultInfo, first_child: Option<XmlElement>) {
        let Some(entry) = self.assemblies.get_mut(&result.ids.assembly) else {
            trace!(
                "ignoring result for test `{}` in unknown assembly `{}`",
                result.ids.test, result.ids.assembly
            );
            return;
        };
        let Some(test) = self.cache.test(&result.ids.test) else {
            trace!("ignoring result for unknown test `{}`", result.ids.test);
            return;
        };

        let mut testcase = XmlElement::new("testcase");
        testcase
            .set_attribute("name", &test.display_name)
            .set_attribute("time", seconds_f6(result.execution_time))
            .set_attribute_opt(
                "classname",
                self.cache
                    .class(result.ids.class.as_deref())
                    .map(|class| class.class_name.as_str()),
            );

        if let Some(child) = first_child {
            testcase.add_child(child);
        }
        if let Some(output) = output_and_warnings(&result.output, result.warnings()) {
            testcase.add_child(XmlElement::new("system-out").with_text(output));
        }

        entry.data.element.add_child(testcase);
    }

    fn assembly_finished(&mut self, finished: &AssemblyFinished) {
        let id = &finished.assembly_unique_id;
        let (Some(entry), Some(starting)) = (self.assemblies.get_mut(id), self.cache.assembly(id))
        else {
            trace!("ignoring finish of unknown assembly `{id}`");
            return;
        };

        let JunitAssembly {
            mut element,
            errors,
        } = mem::take(&mut entry.data);
        let summary = &finished.summary;

        // Assembly errors are reported through system-err. They only count towards the errors
        // attribute of the root element.
        element
            .set_attribute(
                "name",
                starting
                    .assembly_path
                    .as_deref()
                    .unwrap_or(&starting.assembly_name),
            )
            .set_attribute("tests", summary.total.to_string())
            .set_attribute("failures", summary.failed.to_string())
            .set_attribute("errors", "0")
            .set_attribute("disabled", summary.not_run.to_string())
            .set_attribute("skipped", summary.skipped.to_string())
            .set_attribute("time", seconds_f6(summary.execution_time))
            .set_attribute("timestamp", utc_sortable(&starting.start_time))
            .set_attribute("hostname", self.context.host().computer_or("localhost"));

        if !errors.is_empty() {
            let entries: Vec<_> = errors
                .iter()
                .map(|(message, stack_trace)| match stack_trace.as_deref().and_then(non_blank) {
                    Some(stack_trace) => format!("{message}\n{stack_trace}"),
                    None => message.clone(),
                })
                .collect();
            element.add_child(XmlElement::new("system-err").with_text(format!(
                "One or more exceptions occurred during cleanup:\n\n{}",
                entries.join("\n\n")
            )));
        }

        self.totals.observe_start(starting.start_time);
        self.totals.add_summary(summary);
        self.totals.add_errors(errors.len());
        self.suites.push(element);
    }
}

impl<W: io::Write> ResultWriter for JunitWriter<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => {
                self.assemblies
                    .get_or_insert_with(&starting.assembly_unique_id, |_| {
                        JunitAssembly::default()
                    });
            }
            TestMessage::AssemblyFinished(finished) => self.assembly_finished(finished),
            TestMessage::TestPassed(result) => self.record_test_case(result, None),
            TestMessage::TestFailed(failed) => {
                let mut failure = XmlElement::new("failure")
                    .with_attribute("message", combine_messages(&failed.failure));
                if let Some(stack_trace) = combine_stack_traces(&failed.failure)
                    .filter(|stack_trace| non_blank(stack_trace).is_some())
                {
                    failure.add_text(stack_trace);
                }
                self.record_test_case(&failed.result, Some(failure));
            }
            TestMessage::TestSkipped(skipped) => {
                let element = XmlElement::new("skipped").with_text(&skipped.reason);
                self.record_test_case(&skipped.result, Some(element));
            }
            TestMessage::ErrorMessage(error) => {
                if let Some(id) = &error.assembly_unique_id {
                    self.record_error(id, &error.failure);
                }
            }
            TestMessage::AssemblyCleanupFailure(m) => {
                self.record_error(&m.ids.assembly, &m.failure)
            }
            TestMessage::CollectionCleanupFailure(m) => {
                self.record_error(&m.ids.assembly, &m.failure)
            }
            TestMessage::ClassCleanupFailure(m) => self.record_error(&m.ids.assembly, &m.failure),
            TestMessage::MethodCleanupFailure(m) => self.record_error(&m.ids.assembly, &m.failure),
            TestMessage::CaseCleanupFailure(m) => self.record_error(&m.ids.assembly, &m.failure),
            TestMessage::TestCleanupFailure(m) => self.record_error(&m.ids.assembly, &m.failure),
            TestMessage::CollectionStarting(_)
            | TestMessage::CollectionFinished(_)
            | TestMessage::ClassStarting(_)
            | TestMessage::ClassFinished(_)
            | TestMessage::MethodStarting(_)
            | TestMessage::MethodFinished(_)
            | TestMessage::CaseStarting(_)
            | TestMessage::CaseFinished(_)
            | TestMessage::TestStarting(_)
            | TestMessage::TestNotRun(_)
            | TestMessage::TestFinished(_) => {}
        }

        self.cache.evict(message);
        true
    }

    fn dispose(&mut self) -> Result<(), WriteError> {
        let totals = self.totals;
        let suites = &mut self.suites;
        self.sink.finish_xml(|| {
            let summary = totals.summary();
            // There's no skipped attribute at this level.
            XmlElement::new("testsuites")
                .with_attribute("name", "Test results")
                .with_attribute("tests", summary.total.to_string())
                .with_attribute("failures", summary.failed.to_string())
                .with_attribute("errors", totals.errors().to_string())
                .with_attribute("disabled", summary.not_run.to_string())
                .with_attribute("time", seconds_f6(summary.execution_time))
                .with_attribute(
                    "timestamp",
                    utc_sortable(&totals.start_time().unwrap_or_else(min_date_time)),
                )
                .with_children(mem::take(suites))
        })
    }
}

impl<W: io::Write> Drop for JunitWriter<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::Junit);
    }
}
