//! Typed handler registry.
//!
//! Maps each [`StepKind`] to its [`BoxStepHandler`]. The table is built
//! once at startup and never mutated afterwards; an unregistered kind
//! surfaces as a configuration error at dispatch time, and
//! `missing_kinds` lets wiring code fail fast instead.

use std::collections::HashMap;

use ledgerflow_types::workflow::StepKind;

use crate::graph::all_step_kinds;
use crate::handler::{BoxStepHandler, StepHandler};

/// Step-kind keyed table of business handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StepKind, BoxStepHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a step kind, replacing any previous entry.
    pub fn register<H: StepHandler + 'static>(&mut self, kind: StepKind, handler: H) {
        self.handlers.insert(kind, BoxStepHandler::new(handler));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<H: StepHandler + 'static>(mut self, kind: StepKind, handler: H) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn get(&self, kind: StepKind) -> Option<&BoxStepHandler> {
        self.handlers.get(&kind)
    }

    pub fn contains(&self, kind: StepKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Graph kinds with no registered handler. Wiring code should treat a
    /// non-empty result as a startup error.
    pub fn missing_kinds(&self) -> Vec<StepKind> {
        all_step_kinds()
            .iter()
            .copied()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }
}
