// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Self-contained HTML reports.
//!
//! The page starts with the assemblies that ran and a summary line linking to sections for
//! errors, failures, skipped and not-run tests. Every test is then listed again, grouped by class.
//! Class groups collapse and expand through a small inline script. Groups with failures start
//! expanded.
//!
//! The markup is well-formed XML, so the page can be read back by XML tooling as well as by
//! browsers.

use super::{OnDisposed, ReportSink, ResultFormat, ResultWriter, WriterContext, dispose_on_drop};
use crate::{
    errors::WriteError,
    exception::{combine_messages, combine_stack_traces},
    helpers::{is_blank, min_date_time, non_blank, seconds_f3},
    messages::{FailureInfo, TestMessage, TestResultInfo, Traits},
    metadata::{MetadataCache, RunTotals},
};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::{collections::BTreeMap, io, time::Duration};
use swrite::{SWrite, swrite};
use tracing::trace;

const TITLE: &str = "xUnit.net Test Results";

const STYLE: &str = r#"
      body { font-family: Calibri, Verdana, Arial, sans-serif; background-color: White; color: Black; }
      h2,h3,h4,h5 { margin: 0; padding: 0; }
      h3 { font-weight: normal; }
      h4 { margin: 0.5em 0; }
      h5 { font-weight: normal; font-style: italic; margin-bottom: 0.75em; }
      h6 { font-size: 0.9em; font-weight: bold; margin: 0.5em 0 0 2em; padding: 0; }
      pre,table { font-family: Consolas; font-size: 0.8em; margin: 0 0 0 2.25em; padding: 0; }
      li pre { margin: 0; }
      table { padding-bottom: 0.25em; }
      th { padding: 0 0.5em; border-right: 1px solid #bbb; text-align: left; }
      td { padding-left: 0.5em; }
      ul { margin: 0 0 0 1em; }
      .divided { border-top: solid 1px #e0e2e8; padding-top: 0.5em; margin-top: 0.5em; }
      .row, .altrow { padding: 0.1em 0.3em; }
      .row { background-color: #f0f5fa; }
      .altrow { background-color: #e1ebf4; }
      .success, .failure, .skipped, .notrun { font-weight: bold; }
      .success { color: #0c0; }
      .failure { color: #c00; }
      .skipped { color: #cc0; }
      .notrun { color: #999; }
      .timing { float: right; }
      .indent { margin: 0.25em 0 0.5em 1.5em; }
      .clickable { cursor: pointer; }
      .status-icon { width: 1.5em; display: inline-block; text-align: center; }
      .testcount { font-size: 85%; }
"#;

const SCRIPT: &str = r#"
      function ToggleClass(id) {
        var elem = document.getElementById(id);
        if (elem.style.display == "none") {
          elem.style.display = "block";
        }
        else {
          elem.style.display = "none";
        }
      }
"#;

/// Writes a self-contained HTML report.
#[derive(Debug)]
pub struct HtmlWriter<W: io::Write> {
    sink: ReportSink<W>,
    cache: MetadataCache,
    assembly_names: Vec<String>,
    results: Vec<HtmlTestResult>,
    totals: RunTotals,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HtmlStatus {
    Passed,
    Failed,
    Skipped,
    NotRun,
    Error,
}

impl HtmlStatus {
    fn css_class(self) -> &'static str {
        match self {
            Self::Error | Self::Failed => "failure",
            Self::NotRun => "notrun",
            Self::Passed => "success",
            Self::Skipped => "skipped",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Error | Self::Failed => "\u{2717}",
            Self::NotRun => "\u{1f6c7}",
            Self::Passed => "\u{2713}",
            Self::Skipped => "?",
        }
    }
}

#[derive(Debug)]
struct HtmlTestResult {
    class_name: Option<String>,
    display_name: String,
    message: Option<String>,
    stack_trace: Option<String>,
    output: String,
    status: HtmlStatus,
    time: Duration,
    traits: Traits,
    warnings: Vec<String>,
}

impl HtmlTestResult {
    fn timing(&self) -> String {
        match self.status {
            HtmlStatus::Error => String::new(),
            HtmlStatus::NotRun => "Not Run".to_owned(),
            HtmlStatus::Skipped => "Skipped".to_owned(),
            HtmlStatus::Passed | HtmlStatus::Failed => format!("{}s", seconds_f3(self.time)),
        }
    }
}

impl<W: io::Write> HtmlWriter<W> {
    /// Creates a new writer that writes the report to `output` when disposed.
    pub fn new(output: W, _context: WriterContext) -> Self {
        Self {
            sink: ReportSink::new(ResultFormat::Html, output),
            cache: MetadataCache::new(),
            assembly_names: Vec::new(),
            results: Vec::new(),
            totals: RunTotals::new(),
        }
    }

    /// Registers a callback that receives the rendered report after it has been written.
    pub fn on_disposed(mut self, callback: OnDisposed) -> Self {
        self.sink.set_on_disposed(callback);
        self
    }

    fn record_test(
        &mut self,
        result: &TestResultInfo,
        status: HtmlStatus,
        message: Option<String>,
        stack_trace: Option<String>,
    ) {
        let ids = &result.ids;
        if self.cache.assembly(&ids.assembly).is_none() {
            trace!(
                "ignoring result for test `{}` in unknown assembly `{}`",
                ids.test, ids.assembly
            );
            return;
        }
        let Some(test) = self.cache.test(&ids.test) else {
            trace!("ignoring result for unknown test `{}`", ids.test);
            return;
        };

        self.results.push(HtmlTestResult {
            class_name: self
                .cache
                .class(ids.class.as_deref())
                .map(|class| class.class_name.clone()),
            display_name: test.display_name.clone(),
            message,
            stack_trace,
            output: result.output.clone(),
            status,
            time: result.execution_time,
            traits: test.traits.clone(),
            warnings: result.warnings().to_vec(),
        });
    }

    fn record_error(&mut self, kind: &str, failure: &FailureInfo) {
        self.results.push(HtmlTestResult {
            class_name: None,
            display_name: kind.to_owned(),
            message: Some(combine_messages(failure)),
            stack_trace: combine_stack_traces(failure),
            output: String::new(),
            status: HtmlStatus::Error,
            time: Duration::ZERO,
            traits: Traits::new(),
            warnings: Vec::new(),
        });
        self.totals.add_errors(1);
    }

    fn render(&self) -> String {
        let totals = &self.totals;
        let summary = totals.summary();
        let finish = totals.finish_time().unwrap_or_else(min_date_time);

        let mut out = String::new();
        out.push_str("<html>\n  <head>\n");
        swrite!(out, "    <title>{TITLE}</title>\n");
        swrite!(out, "    <style type=\"text/css\">{STYLE}    </style>\n");
        swrite!(out, "    <script language=\"javascript\">{SCRIPT}    </script>\n");
        out.push_str("  </head>\n  <body>\n");

        out.push_str("    <h3 class=\"divided\"><b>Assemblies Run</b></h3>\n");
        let mut assembly_names: Vec<_> = self.assembly_names.iter().collect();
        assembly_names.sort();
        for name in assembly_names {
            swrite!(out, "    <div>{}</div>\n", encode_text(name));
        }

        // Sections are only rendered for statuses that occurred.
        let sections = [
            (HtmlStatus::Error, "Errors", "errors", "Errors", totals.errors()),
            (HtmlStatus::Failed, "Failures", "failed", "Failed tests", summary.failed),
            (HtmlStatus::Skipped, "Skipped", "skipped", "Skipped tests", summary.skipped),
            (HtmlStatus::NotRun, "Not Run", "notrun", "Not run tests", summary.not_run),
        ];

        out.push_str("    <h3 class=\"divided\"><b>Summary</b></h3>\n");
        swrite!(
            out,
            "    <div>Tests run: <a href=\"#all\"><b>{}</b></a> \u{2014} ",
            summary.total
        );
        for (_, label, anchor, _, count) in sections {
            if count != 0 {
                swrite!(out, "{label}: <a href=\"#{anchor}\"><b>{count}</b></a>, ");
            }
        }
        swrite!(
            out,
            "Run time: <b>{}s</b>, Finished: <b>{}</b></div>\n",
            seconds_f3(summary.execution_time),
            finish.format("%Y-%m-%d %H:%M:%S"),
        );

        for (status, _, anchor, heading, count) in sections {
            if count == 0 {
                continue;
            }
            swrite!(out, "    <br />\n    <h2><a id=\"{anchor}\"></a>{heading}</h2>\n");
            let mut matching: Vec<_> = self
                .results
                .iter()
                .filter(|result| result.status == status)
                .collect();
            matching.sort_by(|a, b| a.display_name.cmp(&b.display_name));
            render_rows(&mut out, &matching);
        }

        out.push_str("    <br />\n    <h2><a id=\"all\"></a>All tests</h2>\n");
        out.push_str("    <h5>Click test class name to expand/collapse test details</h5>\n");

        let mut groups: BTreeMap<Option<&str>, Vec<&HtmlTestResult>> = BTreeMap::new();
        for result in self
            .results
            .iter()
            .filter(|result| result.status != HtmlStatus::Error)
        {
            groups
                .entry(result.class_name.as_deref())
                .or_default()
                .push(result);
        }

        for (index, (class_name, mut results)) in groups.into_iter().enumerate() {
            let id = index + 1;
            results.sort_by(|a, b| a.display_name.cmp(&b.display_name));
            let time: Duration = results.iter().map(|result| result.time).sum();
            let any = |status| results.iter().any(|result| result.status == status);
            let has_failures = any(HtmlStatus::Failed);
            let group_status = if has_failures {
                HtmlStatus::Failed
            } else if any(HtmlStatus::Skipped) {
                HtmlStatus::Skipped
            } else if any(HtmlStatus::NotRun) {
                HtmlStatus::NotRun
            } else {
                HtmlStatus::Passed
            };

            swrite!(
                out,
                "    <h3><span class=\"timing\">{}s</span>\
                 <span class=\"clickable\" onclick=\"ToggleClass('class{id}')\" \
                 ondblclick=\"ToggleClass('class{id}')\">\
                 <span class=\"status-icon\"><span class=\"{}\">{}</span></span> {} \
                 <span class=\"testcount\">[{}]</span></span><br clear=\"all\" />\n",
                seconds_f3(time),
                group_status.css_class(),
                group_status.symbol(),
                encode_text(class_name.unwrap_or_default()),
                results.len(),
            );
            let style = if has_failures {
                ""
            } else {
                " style=\"display: none;\""
            };
            swrite!(out, "    <div class=\"indent\"{style} id=\"class{id}\">\n");
            render_rows(&mut out, &results);
            out.push_str("    </div></h3>\n");
        }

        out.push_str("  </body>\n</html>\n");
        out
    }
}

impl<W: io::Write> ResultWriter for HtmlWriter<W> {
    fn handle_message(&mut self, message: &TestMessage) -> bool {
        self.cache.record(message);

        match message {
            TestMessage::AssemblyStarting(starting) => {
                self.assembly_names.push(
                    starting
                        .assembly_path
                        .clone()
                        .unwrap_or_else(|| "<dynamic>".to_owned()),
                );
            }
            TestMessage::AssemblyFinished(finished) => {
                if self.cache.assembly(&finished.assembly_unique_id).is_some() {
                    self.totals.add_summary(&finished.summary);
                    self.totals.observe_finish(finished.finish_time);
                } else {
                    trace!(
                        "ignoring finish of unknown assembly `{}`",
                        finished.assembly_unique_id
                    );
                }
            }
            TestMessage::TestPassed(result) => {
                self.record_test(result, HtmlStatus::Passed, None, None)
            }
            TestMessage::TestFailed(failed) => self.record_test(
                &failed.result,
                HtmlStatus::Failed,
                Some(combine_messages(&failed.failure)),
                combine_stack_traces(&failed.failure),
            ),
            TestMessage::TestSkipped(skipped) => self.record_test(
                &skipped.result,
                HtmlStatus::Skipped,
                Some(skipped.reason.clone()),
                None,
            ),
            TestMessage::TestNotRun(result) => {
                self.record_test(result, HtmlStatus::NotRun, None, None)
            }
            TestMessage::ErrorMessage(m) => self.record_error("Fatal Error", &m.failure),
            TestMessage::AssemblyCleanupFailure(m) => {
                self.record_error("Test Assembly Cleanup Failure", &m.failure)
            }
            TestMessage::CollectionCleanupFailure(m) => {
                self.record_error("Test Collection Cleanup Failure", &m.failure)
            }
            TestMessage::ClassCleanupFailure(m) => {
                self.record_error("Test Class Cleanup Failure", &m.failure)
            }
            TestMessage::MethodCleanupFailure(m) => {
                self.record_error("Test Method Cleanup Failure", &m.failure)
            }
            TestMessage::CaseCleanupFailure(m) => {
                self.record_error("Test Case Cleanup Failure", &m.failure)
            }
            TestMessage::TestCleanupFailure(m) => {
                self.record_error("Test Cleanup Failure", &m.failure)
            }
            TestMessage::CollectionStarting(_)
            | TestMessage::CollectionFinished(_)
            | TestMessage::ClassStarting(_)
            | TestMessage::ClassFinished(_)
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
        if self.sink.is_disposed() {
            return Ok(());
        }
        let document = self.render();
        self.sink.finish(|| Ok(document.into_bytes()))
    }
}

impl<W: io::Write> Drop for HtmlWriter<W> {
    fn drop(&mut self) {
        dispose_on_drop(self, ResultFormat::Html);
    }
}

fn render_rows(out: &mut String, results: &[&HtmlTestResult]) {
    for (index, result) in results.iter().enumerate() {
        let row_class = if index % 2 == 0 { "row" } else { "altrow" };
        render_result(out, result, row_class);
    }
}

fn render_result(out: &mut String, result: &HtmlTestResult, row_class: &str) {
    swrite!(
        out,
        "      <div class=\"{row_class}\"><span class=\"timing\">{}</span>\
         <span class=\"{} status-icon\">{}</span> {}<br clear=\"all\" />",
        encode_text(&result.timing()),
        result.status.css_class(),
        result.status.symbol(),
        encode_text(&result.display_name),
    );

    if let Some(message) = result.message.as_deref().and_then(non_blank) {
        swrite!(out, "<pre>{}</pre>", encode_text(message));
    }
    if let Some(stack_trace) = result.stack_trace.as_deref().and_then(non_blank) {
        swrite!(out, "<pre>{}</pre>", encode_text(stack_trace));
    }
    if !is_blank(&result.output) {
        swrite!(
            out,
            "<h6>Output:</h6><pre>{}</pre>",
            encode_text(&strip_ansi_escapes::strip_str(&result.output))
        );
    }
    if !result.warnings.is_empty() {
        out.push_str("<h6>Warnings:</h6><ul>");
        for warning in &result.warnings {
            swrite!(out, "<li><pre>{}</pre></li>", encode_text(warning));
        }
        out.push_str("</ul>");
    }
    if !result.traits.is_empty() {
        out.push_str("<h6>Traits:</h6><table cellspacing=\"0\" cellpadding=\"0\">");
        for (name, values) in &result.traits {
            for value in values {
                swrite!(
                    out,
                    "<tr><th>{}</th><td title=\"{}\">{}</td></tr>",
                    encode_text(name),
                    encode_double_quoted_attribute(value),
                    encode_text(value),
                );
            }
        }
        out.push_str("</table>");
    }

    out.push_str("</div>\n");
}
