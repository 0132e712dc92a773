// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-run bookkeeping shared by result writers.
//!
//! * [`MetadataCache`] remembers the starting message of every open scope, so that results and
//!   finished messages (which only carry IDs) can be rendered with names.
//! * [`AssemblyArena`] owns a writer's per-assembly state, keyed by assembly unique ID.
//! * [`RunTotals`] accumulates counts and times across scopes.

use crate::messages::{
    AssemblyStarting, CaseStarting, ClassStarting, CollectionStarting, ExecutionSummary,
    MethodStarting, TestMessage, TestStarting,
};
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Starting metadata for every open scope, keyed by unique ID.
///
/// Metadata is recorded when a starting message arrives, and evicted after the matching finished
/// message has been handled. Test metadata is kept until `TestFinished`, since results arrive
/// between `TestStarting` and `TestFinished`.
#[derive(Clone, Debug, Default)]
pub struct MetadataCache {
    assemblies: HashMap<String, AssemblyStarting>,
    collections: HashMap<String, CollectionStarting>,
    classes: HashMap<String, ClassStarting>,
    methods: HashMap<String, MethodStarting>,
    cases: HashMap<String, CaseStarting>,
    tests: HashMap<String, TestStarting>,
}

impl MetadataCache {
    /// Creates a new, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the metadata carried by a starting message. Other messages are ignored.
    ///
    /// Call this before handling the message.
    pub fn record(&mut self, message: &TestMessage) {
        match message {
            TestMessage::AssemblyStarting(m) => {
                self.assemblies
                    .insert(m.assembly_unique_id.clone(), m.clone());
            }
            TestMessage::CollectionStarting(m) => {
                self.collections.insert(m.ids.collection.clone(), m.clone());
            }
            TestMessage::ClassStarting(m) => {
                self.classes.insert(m.ids.class.clone(), m.clone());
            }
            TestMessage::MethodStarting(m) => {
                self.methods.insert(m.ids.method.clone(), m.clone());
            }
            TestMessage::CaseStarting(m) => {
                self.cases.insert(m.ids.case.clone(), m.clone());
            }
            TestMessage::TestStarting(m) => {
                self.tests.insert(m.ids.test.clone(), m.clone());
            }
            _ => {}
        }
    }

    /// Evicts the metadata of the scope a finished message closes. Other messages are ignored.
    ///
    /// Call this after handling the message.
    pub fn evict(&mut self, message: &TestMessage) {
        match message {
            TestMessage::AssemblyFinished(m) => {
                self.assemblies.remove(&m.assembly_unique_id);
            }
            TestMessage::CollectionFinished(m) => {
                self.collections.remove(&m.ids.collection);
            }
            TestMessage::ClassFinished(m) => {
                self.classes.remove(&m.ids.class);
            }
            TestMessage::MethodFinished(m) => {
                self.methods.remove(&m.ids.method);
            }
            TestMessage::CaseFinished(m) => {
                self.cases.remove(&m.ids.case);
            }
            TestMessage::TestFinished(m) => {
                self.tests.remove(&m.result.ids.test);
            }
            _ => {}
        }
    }

    /// Returns the starting metadata for an assembly.
    pub fn assembly(&self, assembly_unique_id: &str) -> Option<&AssemblyStarting> {
        self.assemblies.get(assembly_unique_id)
    }

    /// Returns the starting metadata for a collection.
    pub fn collection(&self, collection_unique_id: &str) -> Option<&CollectionStarting> {
        self.collections.get(collection_unique_id)
    }

    /// Returns the starting metadata for a class, if the class ID is known.
    pub fn class(&self, class_unique_id: Option<&str>) -> Option<&ClassStarting> {
        self.classes.get(class_unique_id?)
    }

    /// Returns the starting metadata for a method, if the method ID is known.
    pub fn method(&self, method_unique_id: Option<&str>) -> Option<&MethodStarting> {
        self.methods.get(method_unique_id?)
    }

    /// Returns the starting metadata for a test case.
    pub fn case(&self, case_unique_id: &str) -> Option<&CaseStarting> {
        self.cases.get(case_unique_id)
    }

    /// Returns the starting metadata for a test.
    pub fn test(&self, test_unique_id: &str) -> Option<&TestStarting> {
        self.tests.get(test_unique_id)
    }
}

/// Per-assembly state owned by a writer, keyed by assembly unique ID.
///
/// Entries are created when an assembly starts and live until the writer is disposed. Each entry
/// gets a 1-based index in the order assemblies started.
#[derive(Clone, Debug)]
pub struct AssemblyArena<M> {
    entries: IndexMap<String, AssemblyEntry<M>>,
}

/// An entry in an [`AssemblyArena`].
#[derive(Clone, Debug)]
pub struct AssemblyEntry<M> {
    index: usize,

    /// The writer's state for this assembly.
    pub data: M,
}

impl<M> AssemblyEntry<M> {
    /// The 1-based index of the assembly, in the order assemblies started.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<M> AssemblyArena<M> {
    /// Creates a new, empty arena.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Returns the entry for the assembly, creating it with `make` if it doesn't exist yet.
    ///
    /// `make` is passed the index of the new entry.
    pub fn get_or_insert_with(
        &mut self,
        assembly_unique_id: &str,
        make: impl FnOnce(usize) -> M,
    ) -> &mut AssemblyEntry<M> {
        let index = self.entries.len() + 1;
        self.entries
            .entry(assembly_unique_id.to_owned())
            .or_insert_with(|| AssemblyEntry {
                index,
                data: make(index),
            })
    }

    /// Returns the entry for an assembly, if it has started.
    pub fn get(&self, assembly_unique_id: &str) -> Option<&AssemblyEntry<M>> {
        self.entries.get(assembly_unique_id)
    }

    /// Returns the entry for an assembly mutably, if it has started.
    pub fn get_mut(&mut self, assembly_unique_id: &str) -> Option<&mut AssemblyEntry<M>> {
        self.entries.get_mut(assembly_unique_id)
    }

    /// Iterates over entries in the order assemblies started.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssemblyEntry<M>)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    /// Iterates over entries ordered by assembly unique ID.
    pub fn iter_by_id(&self) -> impl Iterator<Item = (&str, &AssemblyEntry<M>)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries.into_iter()
    }

    /// The number of assemblies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no assemblies have started.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M> Default for AssemblyArena<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Running totals for a scope: test counts, execution time, error and warning counts, and the
/// earliest start and latest finish observed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunTotals {
    summary: ExecutionSummary,
    errors: usize,
    warnings: usize,
    start_time: Option<DateTime<FixedOffset>>,
    finish_time: Option<DateTime<FixedOffset>>,
}

impl RunTotals {
    /// Creates empty totals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the counts and time of a finished scope.
    pub fn add_summary(&mut self, summary: &ExecutionSummary) {
        self.summary.add(summary);
    }

    /// Adds to the error count.
    pub fn add_errors(&mut self, errors: usize) {
        self.errors += errors;
    }

    /// Adds to the warning count.
    pub fn add_warnings(&mut self, warnings: usize) {
        self.warnings += warnings;
    }

    /// Records a start time, keeping the earliest.
    pub fn observe_start(&mut self, time: DateTime<FixedOffset>) {
        if self.start_time.is_none_or(|start| time < start) {
            self.start_time = Some(time);
        }
    }

    /// Records a finish time, keeping the latest.
    pub fn observe_finish(&mut self, time: DateTime<FixedOffset>) {
        if self.finish_time.is_none_or(|finish| time > finish) {
            self.finish_time = Some(time);
        }
    }

    /// The accumulated summary.
    pub fn summary(&self) -> &ExecutionSummary {
        &self.summary
    }

    /// The number of passed tests, excluding tests that passed with warnings.
    pub fn passed_without_warnings(&self) -> usize {
        self.summary.passed().saturating_sub(self.warnings)
    }

    /// The accumulated error count.
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// The accumulated warning count.
    pub fn warnings(&self) -> usize {
        self.warnings
    }

    /// The earliest start time observed.
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.start_time
    }

    /// The latest finish time observed.
    pub fn finish_time(&self) -> Option<DateTime<FixedOffset>> {
        self.finish_time
    }
}
