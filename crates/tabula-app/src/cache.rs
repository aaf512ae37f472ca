// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::HashMap;

use crate::{Page, PageKey};

pub const DEFAULT_CACHE_PAGES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub id: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStart {
    /// Caller owns the request and must report back through `complete`.
    Issue(FetchTicket),
    /// Same key already in flight; its result will answer this request too.
    Joined(FetchTicket),
}

#[derive(Debug, Clone)]
struct Entry {
    page: Page,
    last_used: u64,
}

/// Read-through page cache with per-collection invalidation epochs.
#[derive(Debug)]
pub struct QueryCache {
    capacity: usize,
    entries: HashMap<PageKey, Entry>,
    in_flight: HashMap<PageKey, FetchTicket>,
    epochs: HashMap<String, u64>,
    tick: u64,
    next_ticket: u64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PAGES)
    }
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            in_flight: HashMap::new(),
            epochs: HashMap::new(),
            tick: 0,
            next_ticket: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn epoch(&self, collection: &str) -> u64 {
        self.epochs.get(collection).copied().unwrap_or(0)
    }

    pub fn get(&mut self, key: &PageKey) -> Option<&Page> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(&entry.page)
    }

    pub fn peek(&self, key: &PageKey) -> Option<&Page> {
        self.entries.get(key).map(|entry| &entry.page)
    }

    pub fn is_in_flight(&self, key: &PageKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn begin_fetch(&mut self, key: &PageKey) -> FetchStart {
        if let Some(ticket) = self.in_flight.get(key) {
            return FetchStart::Joined(*ticket);
        }
        self.next_ticket += 1;
        let ticket = FetchTicket {
            id: self.next_ticket,
            epoch: self.epoch(&key.collection),
        };
        self.in_flight.insert(key.clone(), ticket);
        FetchStart::Issue(ticket)
    }

    pub fn is_current(&self, key: &PageKey, ticket: FetchTicket) -> bool {
        ticket.epoch == self.epoch(&key.collection)
    }

    /// Settles an issued fetch. The page is stored only when the ticket is
    /// still the registered one and its epoch survived every invalidation.
    pub fn complete(&mut self, key: &PageKey, ticket: FetchTicket, page: Option<&Page>) -> bool {
        if self.in_flight.get(key) == Some(&ticket) {
            self.in_flight.remove(key);
        }
        let Some(page) = page else {
            return false;
        };
        if !self.is_current(key, ticket) {
            return false;
        }
        self.insert(key.clone(), page.clone());
        true
    }

    pub fn insert(&mut self, key: PageKey, page: Page) {
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            Entry {
                page,
                last_used: self.tick,
            },
        );
    }

    /// Drops every page and in-flight fetch for `collection`.
    pub fn invalidate(&mut self, collection: &str) {
        self.entries.retain(|key, _| key.collection != collection);
        self.in_flight.retain(|key, _| key.collection != collection);
        *self.epochs.entry(collection.to_owned()).or_insert(0) += 1;
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
