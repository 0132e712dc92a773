// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NUnit 3 XML reports.
//!
//! The report nests `test-suite` elements three levels deep: `Assembly`, then `TestSuite` (one per
//! collection), then `TestFixture` (one per class). Each fixture holds one `test-case` per test
//! result.
//!
//! Errors and warnings roll up: a cleanup failure is reported locally (`site="TearDown"`) on the
//! suite it happened in, and every enclosing suite reports it as a child failure
//! (`site="Child"`).

use super::{OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop};
use crate::{
    attachments::AttachmentMaterializer,
    errors::WriteError,
    exception::{combine_messages, combine_stack_traces},
    helpers::{min_date_time, non_blank, seconds_f6, utc_ticks_z, utc_universal_sortable},
    messages::{
        AssemblyFinished, ClassIds, ClassStarting, CollectionIds, CollectionStarting,
        ExecutionSummary, FailureInfo, ScopeFinished, TestFinished, TestMessage, TestResultInfo,
    },
    metadata::{AssemblyArena, MetadataCache, RunTotals},
    platform::TargetFramework,
};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use report_xml::XmlElement;
use std::{collections::HashMap, io, mem};
use tracing::trace;

/// Reported as the CLR version of the run as a whole.
const CLR_VERSION: &str = "4.0.30319";

/// Per-assembly IDs are `{assembly index}-{counter}`, with the counter starting here.
const FIRST_ID: usize = 1000;

/// Writes an NUnit 3 XML report.
#[derive(Debug)]
pub struct NunitWriter<W: io::Write> {
    sink: ReportSink<W>,
    context: WriterContext,
    materializer: AttachmentMaterializer,
    cache: MetadataCache,
    assemblies: AssemblyArena<NunitAssembly>,
    suites: Vec<XmlElement>,
    totals: RunTotals,
}

impl<W: io::Write> NunitWriter<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    pub fn new(output: W, context: WriterContext) -> Self {
        Self {
            sink: ReportSink::new(ResultFormat::Nunit, output),
            materializer: context.attachment_materializer(),
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

    fn assembly_mut(&mut self, assembly_unique_id: &str) -> Option<&mut NunitAssembly> {
        match self.assemblies.get_mut(assembly_unique_id) {
            Some(entry) => Some(&mut entry.data),
            None => {
                trace!("ignoring message for unknown assembly `{assembly_unique_id}`");
                None
            }
        }
    }

    fn collection_starting(&mut self, starting: &CollectionStarting) {
        let Some(assembly) = self.assembly_mut(&starting.ids.assembly) else {
            return;
        };
        let id = assembly.next_id();
        let collection = suite_mut(&mut assembly.collections, &starting.ids.collection);
        start_suite(
            &mut collection.element,
            "TestSuite",
            id,
            &starting.collection_display_name,
            starting.collection_class_name.as_deref().unwrap_or_default(),
            &starting.start_time,
        );
    }

    fn collection_finished(&mut self, finished: &ScopeFinished<CollectionIds>) {
        let Some(assembly) = self.assembly_mut(&finished.ids.assembly) else {
            return;
        };
        let collection = suite_mut(&mut assembly.collections, &finished.ids.collection);
        finish_suite(
            &mut collection.element,
            &finished.summary,
            &finished.finish_time,
            &collection.counts,
        );
        assembly.counts.absorb(&collection.counts);
    }

    fn class_starting(&mut self, starting: &ClassStarting) {
        let Some(assembly) = self.assembly_mut(&starting.ids.assembly) else {
            return;
        };
        let id = assembly.next_id();
        let class = suite_mut(&mut assembly.classes, &starting.ids.class);
        start_suite(
            &mut class.element,
            "TestFixture",
            id,
            &starting.class_simple_name,
            &starting.class_name,
            &starting.start_time,
        );
    }

    fn class_finished(&mut self, finished: &ScopeFinished<ClassIds>) {
        let Some(assembly) = self.assembly_mut(&finished.ids.assembly) else {
            return;
        };
        let NunitSuite {
            mut element,
            test_cases,
            counts,
        } = assembly
            .classes
            .shift_remove(&finished.ids.class)
            .unwrap_or_default();

        element.add_children(test_cases);
        finish_suite(&mut element, &finished.summary, &finished.finish_time, &counts);
        // The class's test cases have been moved into the element.
        assembly
            .open_tests
            .retain(|_, (class, _)| class != &finished.ids.class);

        let collection = suite_mut(&mut assembly.collections, &finished.ids.collection);
        collection.counts.absorb(&counts);
        collection.element.add_child(element);
    }

    fn assembly_finished(&mut self, finished: &AssemblyFinished) {
        let id = &finished.assembly_unique_id;
        let (Some(entry), Some(starting)) = (self.assemblies.get_mut(id), self.cache.assembly(id))
        else {
            trace!("ignoring finish of unknown assembly `{id}`");
            return;
        };
        let assembly = &mut entry.data;

        let host = self.context.host();
        let platform = self.context.platform();
        let tool_version = self.context.config().tool_version();
        let target_framework = starting
            .target_framework
            .as_deref()
            .and_then(TargetFramework::parse);
        let assembly_path = starting.assembly_path.as_deref().map(Utf8Path::new);
        let cwd = assembly_path
            .and_then(Utf8Path::parent)
            .map_or("", Utf8Path::as_str);
        let computer = host.computer_or("");

        let environment = XmlElement::new("environment")
            .with_attribute("framework-version", tool_version)
            .with_attribute(
                "clr-version",
                target_framework.as_ref().map_or("", TargetFramework::version),
            )
            .with_attribute("os-version", platform.os_description.trim())
            .with_attribute("platform", platform.os.nunit_platform())
            .with_attribute("cwd", cwd)
            .with_attribute("machine-name", computer)
            .with_attribute("user", host.user_or(""))
            .with_attribute("user-domain", host.domain_or(computer))
            .with_attribute("culture", "")
            .with_attribute("uiculture", "")
            .with_attribute("os-architecture", platform.architecture.to_ascii_lowercase());
        let settings = XmlElement::new("settings")
            .with_child(setting("WorkDirectory", cwd))
            .with_child(setting(
                "ImageTargetFrameworkName",
                starting.target_framework.as_deref().unwrap_or_default(),
            ))
            .with_child(setting(
                "TargetRuntimeFramework",
                target_framework
                    .as_ref()
                    .map(TargetFramework::runtime_framework)
                    .unwrap_or_default(),
            ));

        let mut element = XmlElement::new("test-suite")
            .with_child(environment)
            .with_child(settings)
            .with_children(
                mem::take(&mut assembly.collections)
                    .into_values()
                    .map(|collection| collection.element),
            );
        start_suite(
            &mut element,
            "Assembly",
            assembly.next_id(),
            assembly_path
                .and_then(Utf8Path::file_name)
                .unwrap_or_default(),
            starting.assembly_path.as_deref().unwrap_or_default(),
            &starting.start_time,
        );
        finish_suite(
            &mut element,
            &finished.summary,
            &finished.finish_time,
            &assembly.counts,
        );

        self.totals.observe_start(starting.start_time);
        self.totals.observe_finish(finished.finish_time);
        self.totals.add_summary(&finished.summary);
        self.totals.add_errors(assembly.counts.errors);
        self.totals.add_warnings(assembly.counts.warnings);
        self.suites.push(element);
    }

    fn record_test_case(&mut self, result: &TestResultInfo, outcome: Outcome<'_>) {
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
        let class = self.cache.class(ids.class.as_deref());
        let method = self.cache.method(ids.method.as_deref());
        let assembly = &mut entry.data;

        let warnings = result.warnings();
        let (runstate, result_name, label) = match outcome {
            Outcome::Passed if !warnings.is_empty() => ("Runnable", "Warning", None),
            Outcome::Passed => ("Runnable", "Passed", None),
            Outcome::Failed(_) => ("Runnable", "Failed", None),
            Outcome::Skipped(_) => ("Ignored", "Skipped", Some("Ignored")),
            Outcome::NotRun => ("Explicit", "Skipped", Some("Explicit")),
        };
        let method_name = method.map(|method| method.method_name.as_str());

        let mut test_case = XmlElement::new("test-case");
        test_case
            .set_attribute("id", assembly.next_id())
            .set_attribute("name", method_name.unwrap_or(&test.display_name))
            .set_attribute("fullname", &test.display_name)
            .set_attribute("methodname", method_name.unwrap_or_default())
            .set_attribute(
                "classname",
                class.map_or("", |class| class.class_name.as_str()),
            )
            .set_attribute("runstate", runstate)
            .set_attribute("result", result_name)
            .set_attribute_opt("label", label)
            .set_attribute("start-time", utc_ticks_z(&test.start_time))
            .set_attribute("end-time", utc_ticks_z(&result.finish_time))
            .set_attribute("duration", seconds_f6(result.execution_time))
            .set_attribute("asserts", "0");

        if let Some(output) = non_blank(&result.output) {
            test_case.add_child(XmlElement::new("output").with_text(output));
        }

        // Warnings always come before the failure.
        let mut assertions: Vec<Assertion> = warnings
            .iter()
            .map(|warning| Assertion {
                result: "Warning",
                message: warning.clone(),
                stack_trace: None,
            })
            .collect();
        if let Outcome::Failed(failure) = outcome {
            assertions.push(Assertion {
                result: "Failed",
                message: combine_messages(failure),
                stack_trace: combine_stack_traces(failure),
            });
        }

        // A skipped test's reason comes last, after its properties.
        let summary = match outcome {
            Outcome::Skipped(_) => None,
            Outcome::Passed | Outcome::Failed(_) | Outcome::NotRun => {
                summarize_assertions(&assertions)
            }
        };
        if let Some(summary) = summary {
            let name = if matches!(outcome, Outcome::Failed(_)) {
                "failure"
            } else {
                "reason"
            };
            test_case.add_child(summary.to_element(name));
        }
        if !assertions.is_empty() {
            test_case.add_child(
                XmlElement::new("assertions").with_children(
                    assertions
                        .iter()
                        .map(|assertion| {
                            assertion
                                .to_element("assertion")
                                .with_attribute("result", assertion.result)
                        }),
                ),
            );
        }

        let mut properties: Vec<XmlElement> = test
            .traits
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| property(name, value)))
            .collect();
        if let Outcome::Skipped(reason) = outcome {
            properties.push(property("_SKIPREASON", reason));
        }
        if !properties.is_empty() {
            test_case.add_child(XmlElement::new("properties").with_children(properties));
        }
        if let Outcome::Skipped(reason) = outcome {
            test_case.add_child(
                XmlElement::new("reason")
                    .with_child(XmlElement::new("message").with_cdata(reason)),
            );
        }

        let class_key = ids.class.clone().unwrap_or_default();
        let suite = suite_mut(&mut assembly.classes, &class_key);
        if result_name == "Warning" {
            suite.counts.warnings += 1;
        }
        suite.test_cases.push(test_case);
        let position = suite.test_cases.len() - 1;
        assembly
            .open_tests
            .insert(ids.test.clone(), (class_key, position));
    }

    fn test_finished(&mut self, finished: &TestFinished) {
        let ids = &finished.result.ids;
        let Some(entry) = self.assemblies.get_mut(&ids.assembly) else {
            trace!("ignoring finish of test `{}` in unknown assembly", ids.test);
            return;
        };
        let assembly = &mut entry.data;
        let Some((class, position)) = assembly.open_tests.remove(&ids.test) else {
            return;
        };
        if finished.attachments.is_empty() {
            return;
        }
        let Some(test_case) = assembly
            .classes
            .get_mut(&class)
            .and_then(|class| class.test_cases.get_mut(position))
        else {
            trace!("ignoring attachments for test `{}` without a test case", ids.test);
            return;
        };

        let attachments = match self.materializer.materialize(&ids.test, &finished.attachments) {
            Ok(attachments) => attachments,
            Err(error) => {
                self.sink.defer_error(error);
                return;
            }
        };
        test_case.add_child(
            XmlElement::new("attachments").with_children(attachments.into_iter().map(
                |attachment| {
                    XmlElement::new("attachment")
                        .with_attribute("filePath", attachment.path.into_string())
                        .with_attribute("description", attachment.name)
                },
            )),
        );
    }

    fn record_assembly_error(&mut self, assembly_unique_id: &str, failure: &FailureInfo) {
        if let Some(assembly) = self.assembly_mut(assembly_unique_id) {
            assembly.counts.record_error(failure);
        }
    }

    fn record_collection_error(&mut self, ids: &CollectionIds, failure: &FailureInfo) {
        if let Some(assembly) = self.assembly_mut(&ids.assembly) {
            suite_mut(&mut assembly.collections, &ids.collection)
                .counts
                .record_error(failure);
        }
    }

    fn record_class_error(
        &mut self,
        assembly_unique_id: &str,
        class_unique_id: Option<&str>,
        failure: &FailureInfo,
    ) {
        if let Some(assembly) = self.assembly_mut(assembly_unique_id) {
            suite_mut(&mut assembly.classes, class_unique_id.unwrap_or_default())
                .counts
                .record_error(failure);
        }
    }
}

impl<W: io::Write> ResultWriter for NunitWriter<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => {
                self.assemblies
                    .get_or_insert_with(&starting.assembly_unique_id, NunitAssembly::new);
            }
            TestMessage::AssemblyFinished(finished) => self.assembly_finished(finished),
            TestMessage::CollectionStarting(starting) => self.collection_starting(starting),
            TestMessage::CollectionFinished(finished) => self.collection_finished(finished),
            TestMessage::ClassStarting(starting) => self.class_starting(starting),
            TestMessage::ClassFinished(finished) => self.class_finished(finished),
            TestMessage::TestPassed(result) => self.record_test_case(result, Outcome::Passed),
            TestMessage::TestFailed(failed) => {
                self.record_test_case(&failed.result, Outcome::Failed(&failed.failure))
            }
            TestMessage::TestSkipped(skipped) => {
                self.record_test_case(&skipped.result, Outcome::Skipped(&skipped.reason))
            }
            TestMessage::TestNotRun(result) => self.record_test_case(result, Outcome::NotRun),
            TestMessage::TestFinished(finished) => self.test_finished(finished),
            TestMessage::ErrorMessage(error) => {
                if let Some(id) = &error.assembly_unique_id {
                    self.record_assembly_error(id, &error.failure);
                }
            }
            TestMessage::AssemblyCleanupFailure(m) => {
                self.record_assembly_error(&m.ids.assembly, &m.failure)
            }
            TestMessage::CollectionCleanupFailure(m) => {
                self.record_collection_error(&m.ids, &m.failure)
            }
            // Failures below the collection level are attributed to the class.
            TestMessage::ClassCleanupFailure(m) => {
                self.record_class_error(&m.ids.assembly, Some(&m.ids.class), &m.failure)
            }
            TestMessage::MethodCleanupFailure(m) => {
                self.record_class_error(&m.ids.assembly, m.ids.class.as_deref(), &m.failure)
            }
            TestMessage::CaseCleanupFailure(m) => {
                self.record_class_error(&m.ids.assembly, m.ids.class.as_deref(), &m.failure)
            }
            TestMessage::TestCleanupFailure(m) => {
                self.record_class_error(&m.ids.assembly, m.ids.class.as_deref(), &m.failure)
            }
            TestMessage::MethodStarting(_)
            | TestMessage::MethodFinished(_)
            | TestMessage::CaseStarting(_)
            | TestMessage::CaseFinished(_)
            | TestMessage::TestStarting(_) => {}
        }

        self.cache.evict(message);
        true
    }

    fn dispose(&mut self) -> Result<(), WriteError> {
        let totals = self.totals;
        let tool_version = self.context.config().tool_version();
        let suites = &mut self.suites;
        self.sink.finish_xml(|| {
            let summary = totals.summary();
            XmlElement::new("test-run")
                .with_attribute("id", "0")
                .with_attribute("runstate", "Runnable")
                .with_attribute("testcasecount", summary.total.to_string())
                .with_attribute(
                    "result",
                    suite_result(summary.failed + totals.errors(), totals.warnings()),
                )
                .with_attribute("total", summary.total.to_string())
                .with_attribute("passed", totals.passed_without_warnings().to_string())
                .with_attribute("failed", summary.failed.to_string())
                .with_attribute("warnings", totals.warnings().to_string())
                .with_attribute("inconclusive", "0")
                .with_attribute("skipped", (summary.skipped + summary.not_run).to_string())
                .with_attribute("asserts", "0")
                .with_attribute("engine-version", tool_version)
                .with_attribute("clr-version", CLR_VERSION)
                .with_attribute(
                    "start-time",
                    utc_universal_sortable(&totals.start_time().unwrap_or_else(min_date_time)),
                )
                .with_attribute(
                    "end-time",
                    utc_universal_sortable(&totals.finish_time().unwrap_or_else(min_date_time)),
                )
                .with_attribute("duration", seconds_f6(summary.execution_time))
                .with_child(XmlElement::new("command-line").with_cdata(""))
                .with_children(mem::take(suites))
        })
    }
}

impl<W: io::Write> Drop for NunitWriter<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::Nunit);
    }
}

#[derive(Clone, Copy, Debug)]
enum Outcome<'a> {
    Passed,
    Failed(&'a FailureInfo),
    Skipped(&'a str),
    NotRun,
}

#[derive(Debug)]
struct NunitAssembly {
    index: usize,
    last_id: usize,
    counts: SuiteCounts,
    collections: IndexMap<String, NunitSuite>,
    classes: IndexMap<String, NunitSuite>,
    // Test ID to the class key and position of its test case, until the test finishes.
    open_tests: HashMap<String, (String, usize)>,
}

impl NunitAssembly {
    fn new(index: usize) -> Self {
        Self {
            index,
            last_id: FIRST_ID - 1,
            counts: SuiteCounts::default(),
            collections: IndexMap::new(),
            classes: IndexMap::new(),
            open_tests: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> String {
        self.last_id += 1;
        format!("{}-{}", self.index, self.last_id)
    }
}

#[derive(Debug)]
struct NunitSuite {
    element: XmlElement,
    test_cases: Vec<XmlElement>,
    counts: SuiteCounts,
}

impl Default for NunitSuite {
    fn default() -> Self {
        Self {
            element: XmlElement::new("test-suite"),
            test_cases: Vec::new(),
            counts: SuiteCounts::default(),
        }
    }
}

/// Errors and warnings of a suite, including those rolled up from its children.
#[derive(Debug, Default)]
struct SuiteCounts {
    errors: usize,
    warnings: usize,
    local_errors: Vec<(String, Option<String>)>,
}

impl SuiteCounts {
    fn record_error(&mut self, failure: &FailureInfo) {
        self.errors += 1;
        self.local_errors
            .push((combine_messages(failure), combine_stack_traces(failure)));
    }

    fn absorb(&mut self, child: &SuiteCounts) {
        self.errors += child.errors;
        self.warnings += child.warnings;
    }
}

#[derive(Debug)]
struct Assertion {
    result: &'static str,
    message: String,
    stack_trace: Option<String>,
}

impl Assertion {
    fn to_element(&self, name: &str) -> XmlElement {
        XmlElement::new(name)
            .with_child(XmlElement::new("message").with_cdata(&self.message))
            .with_child(
                XmlElement::new("stack-trace")
                    .with_cdata(self.stack_trace.as_deref().unwrap_or_default()),
            )
    }
}

fn summarize_assertions(assertions: &[Assertion]) -> Option<Assertion> {
    match assertions {
        [] => None,
        [single] => Some(Assertion {
            result: single.result,
            message: single.message.clone(),
            stack_trace: single.stack_trace.clone(),
        }),
        _ => {
            let entries: Vec<_> = assertions
                .iter()
                .enumerate()
                .map(|(idx, assertion)| format!("  {}) {}", idx + 1, assertion.message))
                .collect();
            Some(Assertion {
                result: "Failed",
                message: format!(
                    "Multiple failures or warnings in test:\n\n{}",
                    entries.join("\n\n")
                ),
                stack_trace: None,
            })
        }
    }
}

fn suite_mut<'a>(suites: &'a mut IndexMap<String, NunitSuite>, id: &str) -> &'a mut NunitSuite {
    suites.entry(id.to_owned()).or_default()
}

fn start_suite(
    element: &mut XmlElement,
    kind: &str,
    id: String,
    name: &str,
    fullname: &str,
    start_time: &DateTime<FixedOffset>,
) {
    element
        .set_attribute("type", kind)
        .set_attribute("id", id)
        .set_attribute("name", name)
        .set_attribute("fullname", fullname)
        .set_attribute("runstate", "Runnable")
        .set_attribute("start-time", utc_ticks_z(start_time));
}

fn finish_suite(
    element: &mut XmlElement,
    summary: &ExecutionSummary,
    finish_time: &DateTime<FixedOffset>,
    counts: &SuiteCounts,
) {
    element
        .set_attribute("end-time", utc_ticks_z(finish_time))
        .set_attribute("testcasecount", summary.total.to_string())
        .set_attribute(
            "result",
            suite_result(summary.failed + counts.errors, counts.warnings),
        )
        .set_attribute("duration", seconds_f6(summary.execution_time))
        .set_attribute("total", summary.total.to_string())
        .set_attribute(
            "passed",
            summary.passed().saturating_sub(counts.warnings).to_string(),
        )
        .set_attribute("failed", summary.failed.to_string())
        .set_attribute("warnings", counts.warnings.to_string())
        .set_attribute("inconclusive", "0")
        .set_attribute("skipped", (summary.skipped + summary.not_run).to_string())
        .set_attribute("asserts", "0");

    if summary.failed != 0 || counts.errors != 0 || !counts.local_errors.is_empty() {
        let site = if counts.local_errors.is_empty() {
            "Child"
        } else {
            "TearDown"
        };
        element
            .set_attribute("site", site)
            .add_child(failure_element(&counts.local_errors));
    } else if counts.warnings != 0 {
        element.set_attribute("site", "Child").add_child(
            XmlElement::new("failure").with_child(
                XmlElement::new("message").with_cdata("One or more child tests had warnings"),
            ),
        );
    }
}

fn failure_element(errors: &[(String, Option<String>)]) -> XmlElement {
    let (message, stack_trace) = match errors {
        [] => ("One or more child tests had errors".to_owned(), None),
        [(message, stack_trace)] => (message.clone(), stack_trace.as_deref()),
        _ => {
            let entries: Vec<_> = errors
                .iter()
                .enumerate()
                .map(|(idx, (message, stack_trace))| match stack_trace {
                    Some(stack_trace) => format!("{}) {message}\n{stack_trace}", idx + 1),
                    None => format!("{}) {message}", idx + 1),
                })
                .collect();
            (
                format!("Multiple failures in clean-up:\n\n{}", entries.join("\n\n")),
                None,
            )
        }
    };

    let mut failure =
        XmlElement::new("failure").with_child(XmlElement::new("message").with_cdata(message));
    if let Some(stack_trace) = stack_trace {
        failure.add_child(XmlElement::new("stack-trace").with_text(stack_trace));
    }
    failure
}

fn suite_result(failures: usize, warnings: usize) -> &'static str {
    if failures != 0 {
        "Failed"
    } else if warnings != 0 {
        "Warning"
    } else {
        "Passed"
    }
}

fn setting(name: &str, value: impl Into<String>) -> XmlElement {
    XmlElement::new("setting")
        .with_attribute("name", name)
        .with_attribute("value", value)
}

fn property(name: &str, value: &str) -> XmlElement {
    XmlElement::new("property")
        .with_attribute("name", name)
        .with_attribute("value", value)
}
