// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Combine the exceptions in a [`FailureInfo`] into a single message and stack trace.
//!
//! Exceptions form a forest through their parent indices. Rendering starts at the first exception
//! and walks its descendants depth-first.

use crate::messages::FailureInfo;
use swrite::{SWrite, swrite};

/// Exceptions in this namespace are assertion failures, so their type is left out of messages.
const FRAMEWORK_NAMESPACE: &str = "Xunit.Sdk";

/// Stack frames starting with this prefix belong to the test framework and are filtered out.
const FRAMEWORK_FRAME_PREFIX: &str = "at Xunit.";

/// Combines the messages of all exceptions into a single string.
///
/// Each exception renders as `{type} : {message}`, with nested exceptions on their own line and
/// prefixed with `----` per nesting level.
pub fn combine_messages(failure: &FailureInfo) -> String {
    if failure.exceptions().is_empty() {
        return String::new();
    }
    let mut out = String::new();
    write_message(failure, 0, 0, &mut out);
    out
}

/// Combines the stack traces of all exceptions into a single string.
///
/// Returns `None` if the outermost exception has no stack trace and there are no inner
/// exceptions.
pub fn combine_stack_traces(failure: &FailureInfo) -> Option<String> {
    if failure.exceptions().is_empty() {
        return None;
    }
    stack_trace_at(failure, 0)
}

/// Like [`combine_stack_traces`], but renders a missing stack trace as an empty string.
pub fn combine_stack_traces_or_empty(failure: &FailureInfo) -> String {
    combine_stack_traces(failure).unwrap_or_default()
}

fn write_message(failure: &FailureInfo, index: usize, level: usize, out: &mut String) {
    let exception = &failure.exceptions()[index];

    if level > 0 {
        out.push_str(&"----".repeat(level));
        out.push(' ');
    }

    let exception_type = exception.exception_type.as_deref().unwrap_or("");
    if namespace_of(exception_type) != FRAMEWORK_NAMESPACE {
        swrite!(out, "{exception_type} : ");
    }
    out.push_str(&exception.message);

    for child in children_of(failure, index) {
        out.push('\n');
        write_message(failure, child, level + 1, out);
    }
}

fn stack_trace_at(failure: &FailureInfo, index: usize) -> Option<String> {
    let exception = &failure.exceptions()[index];
    let mut result = exception.stack_trace.as_deref().map(filter_stack_trace);

    let children: Vec<_> = children_of(failure, index).collect();
    if children.len() > 1 {
        let out = result.get_or_insert_with(String::new);
        for (idx, &child) in children.iter().enumerate() {
            let child_type = failure.exceptions()[child]
                .exception_type
                .as_deref()
                .unwrap_or("");
            swrite!(
                out,
                "\n----- Inner Stack Trace #{} ({child_type}) -----\n{}",
                idx + 1,
                stack_trace_at(failure, child).unwrap_or_default(),
            );
        }
    } else if let Some(&child) = children.first() {
        let out = result.get_or_insert_with(String::new);
        swrite!(
            out,
            "\n----- Inner Stack Trace -----\n{}",
            stack_trace_at(failure, child).unwrap_or_default(),
        );
    }

    result
}

fn children_of(failure: &FailureInfo, index: usize) -> impl Iterator<Item = usize> + '_ {
    failure
        .exceptions()
        .iter()
        .enumerate()
        .skip(index + 1)
        .filter(move |(_, exception)| exception.parent_index == Some(index))
        .map(|(child, _)| child)
}

fn namespace_of(exception_type: &str) -> &str {
    match exception_type.rfind('.') {
        Some(idx) if idx > 0 => &exception_type[..idx],
        _ => "",
    }
}

fn filter_stack_trace(stack_trace: &str) -> String {
    stack_trace
        .lines()
        .filter(|line| !line.trim_start().starts_with(FRAMEWORK_FRAME_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
}
