// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::VecDeque;

use crate::{
    Backend, ColumnTypeResolver, Effect, Outcome, Step, TableCommand, TableController, TableEvent,
    execute_write, lookup,
};

/// Performs one effect against `backend`. Schema lookups here are uncached;
/// callers that want the per-name cache go through `ColumnTypeResolver`.
pub fn perform<B: Backend + ?Sized>(backend: &B, effect: &Effect) -> Outcome {
    match effect {
        Effect::ResolveSchema { collection } => {
            let mut resolver = ColumnTypeResolver::new();
            Outcome::SchemaResolved(
                lookup(backend, collection).map(|columns| resolver.remember(collection, &columns)),
            )
        }
        Effect::Fetch(fetch) => Outcome::Fetched {
            fetch: fetch.clone(),
            result: fetch
                .query
                .validate()
                .and_then(|()| backend.fetch_page(&fetch.query)),
        },
        Effect::Write(write) => Outcome::Written {
            id: write.id,
            result: execute_write(backend, &write.collection, &write.primary_key, &write.request),
        },
    }
}

/// Runs a controller's effects inline until it settles. Used by `--check`
/// and by tests; the terminal UI runs effects on worker threads instead.
pub struct SyncDriver<'a, B: Backend + ?Sized> {
    backend: &'a B,
    resolver: ColumnTypeResolver,
}

impl<'a, B: Backend + ?Sized> SyncDriver<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            resolver: ColumnTypeResolver::new(),
        }
    }

    pub fn resolver(&self) -> &ColumnTypeResolver {
        &self.resolver
    }

    pub fn dispatch(
        &mut self,
        controller: &mut TableController,
        command: TableCommand,
    ) -> Vec<TableEvent> {
        let step = controller.dispatch(command);
        self.settle(controller, step)
    }

    pub fn settle(&mut self, controller: &mut TableController, step: Step) -> Vec<TableEvent> {
        let mut events = step.events;
        let mut pending = VecDeque::from(step.effects);
        while let Some(effect) = pending.pop_front() {
            let outcome = match &effect {
                Effect::ResolveSchema { collection } => Outcome::SchemaResolved(
                    self.resolver.resolve(self.backend, collection),
                ),
                other => perform(self.backend, other),
            };
            let next = controller.apply(outcome);
            events.extend(next.events);
            pending.extend(next.effects);
        }
        events
    }
}
