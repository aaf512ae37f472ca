// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{BTreeSet, HashMap, VecDeque};

use time::{Date, OffsetDateTime};

use crate::{
    BoundInput, ColumnDescriptor, ColumnTypes, DEFAULT_CACHE_PAGES, DateFilter, DateRange,
    FetchStart, FetchTicket, FormError, FormMode, FormState, InputKind,
    MutationResult, Notification, Page, PageQuery, QueryCache, Record, RecordKey, RemoteError,
    ResolvedColumns, SchemaResolutionError, SearchFilter, TableSchema, Value, ViewState,
    WriteRequest, diff, form_to_record, has_next_page, has_previous_page, is_allowed_page_size,
    render_form, sort_records, total_pages,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TableCommand {
    Mount,
    Refresh,
    GoToPage(usize),
    NextPage,
    PreviousPage,
    SetPageSize(usize),
    SetSearch(String),
    SetSearchColumn(String),
    SetDateRange(DateRange),
    ClearDateRange,
    CycleSort(String),
    ToggleColumn(String),
    ShowAllColumns,
    ToggleSelection(RecordKey),
    SelectAllRendered,
    ClearSelection,
    OpenAdd,
    OpenEdit(Record),
    EditField { field: String, edit: FieldEdit },
    SaveDialog,
    CancelDialog,
    RequestDelete,
    ConfirmDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Push(char),
    Pop,
    Replace(String),
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Add,
    Edit,
    Delete,
}

impl DialogKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    SchemaResolved,
    SchemaDegraded(String),
    LoadingStarted,
    PageLoaded { page: usize, total: usize },
    ReadFailed(String),
    ViewChanged,
    SelectionChanged(usize),
    DialogOpened(DialogKind),
    DialogClosed(DialogKind),
    FormChanged,
    InputRejected { field: String },
    FormInvalid(FormError),
    Notify(Notification),
    Status(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEffect {
    pub ticket: FetchTicket,
    pub generation: u64,
    pub query: PageQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteEffect {
    pub id: u64,
    pub collection: String,
    pub primary_key: String,
    pub request: WriteRequest,
}

/// Work the controller asks its executor to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ResolveSchema { collection: String },
    Fetch(FetchEffect),
    Write(WriteEffect),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    SchemaResolved(Result<ResolvedColumns, SchemaResolutionError>),
    Fetched {
        fetch: FetchEffect,
        result: Result<Page, RemoteError>,
    },
    Written {
        id: u64,
        result: Result<MutationResult, RemoteError>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    pub events: Vec<TableEvent>,
    pub effects: Vec<Effect>,
}

impl Step {
    fn event(event: TableEvent) -> Self {
        Self {
            events: vec![event],
            effects: Vec::new(),
        }
    }

    fn status(message: impl Into<String>) -> Self {
        Self::event(TableEvent::Status(message.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.effects.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    Pending,
    Resolving,
    Resolved,
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddDialog {
    pub form: FormState,
    pub error: Option<String>,
    pub saving: Option<u64>,
}

/// Open edit. `snapshot` is fixed at open time and only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    snapshot: Record,
    key: RecordKey,
    pub form: FormState,
    pub error: Option<String>,
    pub saving: Option<u64>,
}

impl PendingEdit {
    pub fn snapshot(&self) -> &Record {
        &self.snapshot
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteConfirm {
    pub keys: Vec<RecordKey>,
    pub error: Option<String>,
    pub saving: Option<u64>,
}

/// Writes in flight plus writes waiting for one of their keys to free up.
#[derive(Debug, Default)]
struct WriteQueue {
    active: HashMap<u64, Vec<RecordKey>>,
    waiting: VecDeque<WriteEffect>,
}

impl WriteQueue {
    fn busy_keys(&self) -> BTreeSet<&RecordKey> {
        self.active.values().flatten().collect()
    }

    fn submit(&mut self, effect: WriteEffect) -> Option<WriteEffect> {
        let keys = effect.request.keys();
        let busy = self.busy_keys();
        let queued = self
            .waiting
            .iter()
            .flat_map(|waiting| waiting.request.keys())
            .collect::<BTreeSet<_>>();
        if keys
            .iter()
            .any(|key| busy.contains(key) || queued.contains(key))
        {
            tracing::debug!(id = effect.id, "write queued behind in-flight write on same key");
            self.waiting.push_back(effect);
            return None;
        }
        self.active.insert(effect.id, keys);
        Some(effect)
    }

    /// Releases `id` and returns queued writes that may now start, in order.
    fn finish(&mut self, id: u64) -> Vec<WriteEffect> {
        self.active.remove(&id);
        let mut ready = Vec::new();
        let mut still_waiting = VecDeque::new();
        let mut blocked: BTreeSet<RecordKey> = self.busy_keys().into_iter().cloned().collect();
        while let Some(effect) = self.waiting.pop_front() {
            let keys = effect.request.keys();
            if keys.iter().any(|key| blocked.contains(key)) {
                blocked.extend(keys);
                still_waiting.push_back(effect);
            } else {
                blocked.extend(keys.iter().cloned());
                self.active.insert(effect.id, keys);
                ready.push(effect);
            }
        }
        self.waiting = still_waiting;
        ready
    }
}

/// Grid state machine for one collection. Commands and outcomes go in,
/// events for the presentation layer and effects for the executor come out.
#[derive(Debug)]
pub struct TableController {
    schema: TableSchema,
    types: ColumnTypes,
    schema_state: SchemaState,
    view: ViewState,
    cache: QueryCache,
    rows: Vec<Record>,
    total: usize,
    loaded: Option<PageQuery>,
    loading: bool,
    read_error: Option<String>,
    generation: u64,
    add: Option<AddDialog>,
    edit: Option<PendingEdit>,
    delete: Option<DeleteConfirm>,
    focus: Option<DialogKind>,
    writes: WriteQueue,
    next_write: u64,
    status: Option<String>,
    today: fn() -> Date,
}

fn utc_today() -> Date {
    OffsetDateTime::now_utc().date()
}

impl TableController {
    pub fn new(schema: TableSchema) -> Self {
        Self::with_options(schema, crate::DEFAULT_PAGE_SIZE, DEFAULT_CACHE_PAGES)
    }

    pub fn with_options(schema: TableSchema, page_size: usize, cache_pages: usize) -> Self {
        let types = schema.effective_types(&ColumnTypes::new());
        Self {
            schema,
            types,
            schema_state: SchemaState::Pending,
            view: ViewState::with_page_size(page_size),
            cache: QueryCache::new(cache_pages),
            rows: Vec::new(),
            total: 0,
            loaded: None,
            loading: false,
            read_error: None,
            generation: 0,
            add: None,
            edit: None,
            delete: None,
            focus: None,
            writes: WriteQueue::default(),
            next_write: 0,
            status: None,
            today: utc_today,
        }
    }

    pub fn with_clock(mut self, today: fn() -> Date) -> Self {
        self.today = today;
        self
    }

    pub fn collection(&self) -> &str {
        &self.schema.collection
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn types(&self) -> &ColumnTypes {
        &self.types
    }

    pub fn schema_state(&self) -> &SchemaState {
        &self.schema_state
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.total, self.view.page_size)
    }

    pub fn has_next_page(&self) -> bool {
        has_next_page(self.view.page, self.total, self.view.page_size)
    }

    pub fn has_previous_page(&self) -> bool {
        has_previous_page(self.view.page)
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn read_error(&self) -> Option<&str> {
        self.read_error.as_deref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Query whose result is on screen.
    pub fn loaded_query(&self) -> Option<&PageQuery> {
        self.loaded.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn add_dialog(&self) -> Option<&AddDialog> {
        self.add.as_ref()
    }

    pub fn edit_dialog(&self) -> Option<&PendingEdit> {
        self.edit.as_ref()
    }

    pub fn delete_dialog(&self) -> Option<&DeleteConfirm> {
        self.delete.as_ref()
    }

    pub fn focused_dialog(&self) -> Option<DialogKind> {
        self.focus
    }

    pub fn visible_columns(&self) -> Vec<&ColumnDescriptor> {
        self.schema
            .columns
            .iter()
            .filter(|column| column.show_in_table && !self.view.hidden_columns.contains(&column.field))
            .collect()
    }

    /// Current page in display order.
    pub fn rendered_rows(&self) -> Vec<Record> {
        let mut rows = self.rows.clone();
        if let Some(spec) = &self.view.sort {
            let column = self.schema.column(&spec.field);
            sort_records(&mut rows, spec.direction, |record| match column {
                Some(column) => self.schema.cell(record, column),
                None => record.get(&spec.field).cloned().unwrap_or(Value::Null),
            });
        }
        rows
    }

    pub fn cell(&self, record: &Record, column: &ColumnDescriptor) -> Value {
        self.schema.cell(record, column)
    }

    pub fn is_selected(&self, record: &Record) -> bool {
        record
            .key(&self.schema.primary_key)
            .is_some_and(|key| self.view.selected.contains(&key))
    }

    /// Inputs of an open dialog, without mutating its form.
    pub fn form_inputs(&self, kind: DialogKind) -> Vec<BoundInput> {
        let (mut form, mode) = match kind {
            DialogKind::Add => match &self.add {
                Some(dialog) => (dialog.form.clone(), FormMode::Add),
                None => return Vec::new(),
            },
            DialogKind::Edit => match &self.edit {
                Some(edit) => (edit.form.clone(), FormMode::Edit),
                None => return Vec::new(),
            },
            DialogKind::Delete => return Vec::new(),
        };
        render_form(&self.schema, &self.types, &mut form, mode, (self.today)())
    }

    pub fn page_query(&self) -> PageQuery {
        let search = self
            .view
            .search_column
            .as_ref()
            .filter(|_| !self.view.search.trim().is_empty())
            .map(|column| SearchFilter {
                column: column.clone(),
                term: self.view.search.trim().to_owned(),
            });
        let date = match (&self.schema.date_filter_column, self.view.date_range) {
            (Some(column), Some(range)) => Some(DateFilter {
                column: column.clone(),
                range,
            }),
            _ => None,
        };
        PageQuery {
            collection: self.schema.collection.clone(),
            page: self.view.page,
            page_size: self.view.page_size,
            search,
            date,
        }
    }

    pub fn dispatch(&mut self, command: TableCommand) -> Step {
        let step = match command {
            TableCommand::Mount => self.mount(),
            TableCommand::Refresh => self.refresh(),
            TableCommand::GoToPage(page) => self.go_to_page(page),
            TableCommand::NextPage => {
                if self.has_next_page() {
                    self.view.page += 1;
                    self.request_page(false)
                } else {
                    Step::status("already on the last page")
                }
            }
            TableCommand::PreviousPage => {
                if self.has_previous_page() {
                    self.view.page -= 1;
                    self.request_page(false)
                } else {
                    Step::status("already on the first page")
                }
            }
            TableCommand::SetPageSize(size) => {
                if !is_allowed_page_size(size) {
                    return self.with_status(Step::status(format!("page size {size} is not offered")));
                }
                self.view.page_size = size;
                self.view.page = 1;
                self.request_page(false)
            }
            TableCommand::SetSearch(term) => {
                self.view.search = term;
                self.view.page = 1;
                self.request_page(false)
            }
            TableCommand::SetSearchColumn(column) => self.set_search_column(column),
            TableCommand::SetDateRange(range) => self.set_date_range(Some(range)),
            TableCommand::ClearDateRange => self.set_date_range(None),
            TableCommand::CycleSort(field) => {
                self.view.cycle_sort(&field);
                Step::event(TableEvent::ViewChanged)
            }
            TableCommand::ToggleColumn(field) => self.toggle_column(field),
            TableCommand::ShowAllColumns => {
                self.view.hidden_columns.clear();
                Step::event(TableEvent::ViewChanged)
            }
            TableCommand::ToggleSelection(key) => {
                if !self.view.selected.remove(&key) {
                    self.view.selected.insert(key);
                }
                Step::event(TableEvent::SelectionChanged(self.view.selected.len()))
            }
            TableCommand::SelectAllRendered => {
                let keys = self
                    .rows
                    .iter()
                    .filter_map(|row| row.key(&self.schema.primary_key))
                    .collect::<Vec<_>>();
                self.view.selected.extend(keys);
                Step::event(TableEvent::SelectionChanged(self.view.selected.len()))
            }
            TableCommand::ClearSelection => {
                self.view.selected.clear();
                Step::event(TableEvent::SelectionChanged(0))
            }
            TableCommand::OpenAdd => self.open_add(),
            TableCommand::OpenEdit(record) => self.open_edit(record),
            TableCommand::EditField { field, edit } => self.edit_field(field, edit),
            TableCommand::SaveDialog => self.save_dialog(),
            TableCommand::CancelDialog => self.cancel_dialog(),
            TableCommand::RequestDelete => self.request_delete(),
            TableCommand::ConfirmDelete => self.confirm_delete(),
        };
        self.with_status(step)
    }

    pub fn apply(&mut self, outcome: Outcome) -> Step {
        let step = match outcome {
            Outcome::SchemaResolved(result) => self.schema_resolved(result),
            Outcome::Fetched { fetch, result } => self.fetched(fetch, result),
            Outcome::Written { id, result } => self.written(id, result),
        };
        self.with_status(step)
    }

    fn with_status(&mut self, step: Step) -> Step {
        for event in &step.events {
            match event {
                TableEvent::Status(message) => self.status = Some(message.clone()),
                TableEvent::Notify(notification) => {
                    self.status = Some(format!("{}: {}", notification.title, notification.detail));
                }
                _ => {}
            }
        }
        step
    }

    fn mount(&mut self) -> Step {
        let mut step = Step::default();
        if matches!(self.schema_state, SchemaState::Pending | SchemaState::Degraded(_)) {
            self.schema_state = SchemaState::Resolving;
            step.effects.push(Effect::ResolveSchema {
                collection: self.schema.collection.clone(),
            });
        }
        self.ensure_search_column();
        let fetch = self.request_page(false);
        merge(&mut step, fetch);
        step
    }

    fn refresh(&mut self) -> Step {
        let mut step = Step::default();
        if matches!(self.schema_state, SchemaState::Degraded(_)) {
            self.schema_state = SchemaState::Resolving;
            step.effects.push(Effect::ResolveSchema {
                collection: self.schema.collection.clone(),
            });
        }
        self.cache.invalidate(&self.schema.collection);
        let fetch = self.request_page(true);
        merge(&mut step, fetch);
        step
    }

    fn go_to_page(&mut self, page: usize) -> Step {
        let last = self.total_pages().max(1);
        if page == 0 || page > last {
            return Step::status(format!("page {page} is out of range 1..={last}"));
        }
        self.view.page = page;
        self.request_page(false)
    }

    fn set_search_column(&mut self, column: String) -> Step {
        if self.schema.column(&column).is_none() {
            return Step::status(format!("no column named {column}"));
        }
        self.view.search_column = Some(column);
        self.view.page = 1;
        self.request_page(false)
    }

    // The page is kept; an out-of-range page is clamped once the total is known.
    fn set_date_range(&mut self, range: Option<DateRange>) -> Step {
        if self.schema.date_filter_column.is_none() {
            return Step::status("no date column is configured for this table");
        }
        self.view.date_range = range;
        self.request_page(false)
    }

    fn toggle_column(&mut self, field: String) -> Step {
        if self.view.hidden_columns.remove(&field) {
            return Step::event(TableEvent::ViewChanged);
        }
        if self.schema.column(&field).is_none() {
            return Step::status(format!("no column named {field}"));
        }
        if self.visible_columns().len() <= 1 {
            return Step::status("at least one column must stay visible");
        }
        self.view.hidden_columns.insert(field);
        Step::event(TableEvent::ViewChanged)
    }

    fn ensure_search_column(&mut self) {
        if self.view.search_column.is_none() {
            self.view.search_column = self.schema.default_search_column(&self.types);
        }
    }

    /// Read-through: serve from cache unless `force`, otherwise issue or join
    /// a fetch. The previous rows stay visible until the new page lands.
    fn request_page(&mut self, force: bool) -> Step {
        self.generation += 1;
        let query = self.page_query();
        if !force {
            if let Some(page) = self.cache.get(&query).cloned() {
                self.show_page(query, page);
                return Step::event(TableEvent::PageLoaded {
                    page: self.view.page,
                    total: self.total,
                });
            }
        }
        self.loading = true;
        let mut step = Step::event(TableEvent::LoadingStarted);
        match self.cache.begin_fetch(&query) {
            FetchStart::Issue(ticket) => {
                tracing::debug!(
                    collection = %query.collection,
                    page = query.page,
                    generation = self.generation,
                    "fetch issued"
                );
                step.effects.push(Effect::Fetch(FetchEffect {
                    ticket,
                    generation: self.generation,
                    query,
                }));
            }
            FetchStart::Joined(ticket) => {
                tracing::debug!(ticket = ticket.id, "fetch joined in-flight request");
            }
        }
        step
    }

    fn show_page(&mut self, query: PageQuery, page: Page) {
        self.rows = page
            .records
            .into_iter()
            .map(|row| row.coerce(&self.types))
            .collect();
        self.total = page.total;
        self.loaded = Some(query);
        self.loading = false;
        self.read_error = None;
        let fields = self
            .rows
            .first()
            .map(|row| row.field_names().map(str::to_owned).collect::<Vec<_>>())
            .unwrap_or_default();
        if self.schema.derive_columns(fields.iter().map(String::as_str)) {
            self.ensure_search_column();
        }
    }

    fn schema_resolved(&mut self, result: Result<ResolvedColumns, SchemaResolutionError>) -> Step {
        match result {
            Ok(resolved) => {
                self.types = self.schema.effective_types(&resolved.types);
                self.schema
                    .derive_columns(resolved.order.iter().map(String::as_str));
                self.schema_state = SchemaState::Resolved;
                self.rows = std::mem::take(&mut self.rows)
                    .into_iter()
                    .map(|row| row.coerce(&self.types))
                    .collect();
                self.ensure_search_column();
                Step::event(TableEvent::SchemaResolved)
            }
            Err(error) => {
                tracing::warn!(
                    collection = %self.schema.collection,
                    error = %error,
                    "column types unavailable, treating columns as text"
                );
                let message = error.to_string();
                self.schema_state = SchemaState::Degraded(message.clone());
                Step::event(TableEvent::SchemaDegraded(message))
            }
        }
    }

    fn fetched(&mut self, fetch: FetchEffect, result: Result<Page, RemoteError>) -> Step {
        let FetchEffect {
            ticket,
            generation,
            query,
        } = fetch;
        self.cache.complete(&query, ticket, result.as_ref().ok());
        if query != self.page_query() || !self.cache.is_current(&query, ticket) {
            tracing::debug!(
                collection = %query.collection,
                generation,
                current = self.generation,
                "discarding stale fetch result"
            );
            return Step::default();
        }
        match result {
            Ok(page) => {
                self.show_page(query, page);
                let last = self.total_pages().max(1);
                if self.view.page > last {
                    self.view.page = last;
                    let mut step = Step::status(format!("showing last page {last}"));
                    merge(&mut step, self.request_page(false));
                    return step;
                }
                Step::event(TableEvent::PageLoaded {
                    page: self.view.page,
                    total: self.total,
                })
            }
            Err(error) => {
                tracing::warn!(collection = %query.collection, error = %error, "page fetch failed");
                self.loading = false;
                self.read_error = Some(error.message.clone());
                Step::event(TableEvent::ReadFailed(error.message))
            }
        }
    }

    fn open_add(&mut self) -> Step {
        if self.add.is_none() {
            let mut form = FormState::new();
            render_form(&self.schema, &self.types, &mut form, FormMode::Add, (self.today)());
            self.add = Some(AddDialog {
                form,
                error: None,
                saving: None,
            });
        }
        self.focus = Some(DialogKind::Add);
        Step::event(TableEvent::DialogOpened(DialogKind::Add))
    }

    fn open_edit(&mut self, record: Record) -> Step {
        if self.edit.as_ref().is_some_and(|edit| edit.saving.is_some()) {
            return Step::status("an edit is still saving");
        }
        let snapshot = record.coerce(&self.types);
        let Some(key) = snapshot.key(&self.schema.primary_key) else {
            return Step::status(format!(
                "record has no {} and cannot be edited",
                self.schema.primary_key
            ));
        };
        let form = FormState::from_record(&self.schema, &self.types, &snapshot);
        self.edit = Some(PendingEdit {
            snapshot,
            key,
            form,
            error: None,
            saving: None,
        });
        self.focus = Some(DialogKind::Edit);
        Step::event(TableEvent::DialogOpened(DialogKind::Edit))
    }

    fn edit_field(&mut self, field: String, edit: FieldEdit) -> Step {
        let kind = InputKind::for_type(self.schema.semantic_type(&field, &self.types));
        let form = match self.focus {
            Some(DialogKind::Add) => self.add.as_mut().map(|dialog| &mut dialog.form),
            Some(DialogKind::Edit) => self.edit.as_mut().map(|edit| &mut edit.form),
            _ => None,
        };
        let Some(form) = form else {
            return Step::default();
        };
        let accepted = match edit {
            FieldEdit::Push(ch) => form.push_char(&field, kind, ch),
            FieldEdit::Pop => {
                form.pop_char(&field);
                true
            }
            FieldEdit::Replace(text) => form.set_text(&field, kind, &text),
            FieldEdit::Toggle => {
                form.toggle(&field);
                true
            }
        };
        if accepted {
            Step::event(TableEvent::FormChanged)
        } else {
            Step::event(TableEvent::InputRejected { field })
        }
    }

    fn save_dialog(&mut self) -> Step {
        match self.focus {
            Some(DialogKind::Add) => self.save_add(),
            Some(DialogKind::Edit) => self.save_edit(),
            Some(DialogKind::Delete) => self.confirm_delete(),
            None => Step::default(),
        }
    }

    fn save_add(&mut self) -> Step {
        let today = (self.today)();
        let Some(dialog) = self.add.as_mut() else {
            return Step::default();
        };
        if dialog.saving.is_some() {
            return Step::status("still saving");
        }
        render_form(&self.schema, &self.types, &mut dialog.form, FormMode::Add, today);
        let record = match form_to_record(&self.schema, &self.types, &dialog.form, FormMode::Add, today) {
            Ok(record) => record,
            Err(error) => {
                dialog.error = Some(error.to_string());
                return Step::event(TableEvent::FormInvalid(error));
            }
        };
        self.submit_write(DialogKind::Add, WriteRequest::Insert(record))
    }

    fn save_edit(&mut self) -> Step {
        let today = (self.today)();
        let Some(edit) = self.edit.as_mut() else {
            return Step::default();
        };
        if edit.saving.is_some() {
            return Step::status("still saving");
        }
        let edited = match form_to_record(&self.schema, &self.types, &edit.form, FormMode::Edit, today) {
            Ok(record) => record,
            Err(error) => {
                edit.error = Some(error.to_string());
                return Step::event(TableEvent::FormInvalid(error));
            }
        };
        let changes = diff(&self.schema, &edit.snapshot, &edited);
        if changes.is_empty() {
            self.close(DialogKind::Edit);
            return Step {
                events: vec![
                    TableEvent::DialogClosed(DialogKind::Edit),
                    TableEvent::Status("no changes".to_owned()),
                ],
                effects: Vec::new(),
            };
        }
        let key = edit.key.clone();
        self.submit_write(DialogKind::Edit, WriteRequest::Update { key, fields: changes })
    }

    fn request_delete(&mut self) -> Step {
        if self.view.selected.is_empty() {
            return Step::status("nothing selected");
        }
        if self.delete.as_ref().is_some_and(|confirm| confirm.saving.is_some()) {
            return Step::status("a delete is still running");
        }
        self.delete = Some(DeleteConfirm {
            keys: self.view.selected.iter().cloned().collect(),
            error: None,
            saving: None,
        });
        self.focus = Some(DialogKind::Delete);
        Step::event(TableEvent::DialogOpened(DialogKind::Delete))
    }

    fn confirm_delete(&mut self) -> Step {
        let Some(confirm) = self.delete.as_ref() else {
            return Step::status("nothing selected");
        };
        if confirm.saving.is_some() {
            return Step::status("still deleting");
        }
        if confirm.keys.is_empty() {
            self.close(DialogKind::Delete);
            return Step::event(TableEvent::DialogClosed(DialogKind::Delete));
        }
        let keys = confirm.keys.clone();
        self.submit_write(DialogKind::Delete, WriteRequest::Delete(keys))
    }

    fn cancel_dialog(&mut self) -> Step {
        match self.focus {
            Some(kind) => {
                self.close(kind);
                Step::event(TableEvent::DialogClosed(kind))
            }
            None => Step::default(),
        }
    }

    fn close(&mut self, kind: DialogKind) {
        match kind {
            DialogKind::Add => self.add = None,
            DialogKind::Edit => self.edit = None,
            DialogKind::Delete => self.delete = None,
        }
        if self.focus == Some(kind) {
            self.focus = [DialogKind::Edit, DialogKind::Add, DialogKind::Delete]
                .into_iter()
                .find(|other| self.is_open(*other));
        }
    }

    fn is_open(&self, kind: DialogKind) -> bool {
        match kind {
            DialogKind::Add => self.add.is_some(),
            DialogKind::Edit => self.edit.is_some(),
            DialogKind::Delete => self.delete.is_some(),
        }
    }

    fn saving_slot(&mut self, kind: DialogKind) -> Option<&mut Option<u64>> {
        match kind {
            DialogKind::Add => self.add.as_mut().map(|dialog| &mut dialog.saving),
            DialogKind::Edit => self.edit.as_mut().map(|edit| &mut edit.saving),
            DialogKind::Delete => self.delete.as_mut().map(|confirm| &mut confirm.saving),
        }
    }

    fn dialog_for_write(&self, id: u64) -> Option<DialogKind> {
        if self.add.as_ref().is_some_and(|dialog| dialog.saving == Some(id)) {
            return Some(DialogKind::Add);
        }
        if self.edit.as_ref().is_some_and(|edit| edit.saving == Some(id)) {
            return Some(DialogKind::Edit);
        }
        if self.delete.as_ref().is_some_and(|confirm| confirm.saving == Some(id)) {
            return Some(DialogKind::Delete);
        }
        None
    }

    fn submit_write(&mut self, kind: DialogKind, request: WriteRequest) -> Step {
        self.next_write += 1;
        let id = self.next_write;
        if let Some(slot) = self.saving_slot(kind) {
            *slot = Some(id);
        }
        let effect = WriteEffect {
            id,
            collection: self.schema.collection.clone(),
            primary_key: self.schema.primary_key.clone(),
            request,
        };
        let mut step = Step::status(format!("saving {}", kind.label()));
        if let Some(effect) = self.writes.submit(effect) {
            step.effects.push(Effect::Write(effect));
        }
        step
    }

    fn written(&mut self, id: u64, result: Result<MutationResult, RemoteError>) -> Step {
        let mut step = Step::default();
        step.effects.extend(self.writes.finish(id).into_iter().map(Effect::Write));
        let dialog = self.dialog_for_write(id);
        match result {
            Ok(mutation) => {
                let notification = self.apply_mutation(mutation);
                tracing::info!(collection = %self.schema.collection, "{}", notification.title);
                if let Some(kind) = dialog {
                    self.close(kind);
                    step.events.push(TableEvent::DialogClosed(kind));
                }
                step.events.push(TableEvent::Notify(notification));
                self.cache.invalidate(&self.schema.collection);
                merge(&mut step, self.request_page(true));
            }
            Err(error) => {
                tracing::warn!(
                    collection = %self.schema.collection,
                    operation = %error.operation,
                    error = %error.message,
                    "write failed"
                );
                if let Some(kind) = dialog {
                    let message = error.message.clone();
                    match kind {
                        DialogKind::Add => {
                            if let Some(dialog) = self.add.as_mut() {
                                dialog.saving = None;
                                dialog.error = Some(message);
                            }
                        }
                        DialogKind::Edit => {
                            if let Some(edit) = self.edit.as_mut() {
                                edit.saving = None;
                                edit.error = Some(message);
                            }
                        }
                        DialogKind::Delete => {
                            if let Some(confirm) = self.delete.as_mut() {
                                confirm.saving = None;
                                confirm.error = Some(message);
                            }
                        }
                    }
                }
                step.events.push(TableEvent::Notify(failure_notice(&error)));
            }
        }
        step
    }

    /// Folds a confirmed write into the displayed page ahead of the refetch.
    fn apply_mutation(&mut self, mutation: MutationResult) -> Notification {
        match mutation {
            MutationResult::Inserted(rows) => {
                let detail = match rows.len() {
                    1 => "1 record added".to_owned(),
                    count => format!("{count} records added"),
                };
                Notification::success("Record added", detail)
            }
            MutationResult::Updated { key, applied } => {
                let applied = applied.coerce(&self.types);
                let primary_key = self.schema.primary_key.clone();
                if let Some(row) = self
                    .rows
                    .iter_mut()
                    .find(|row| row.key(&primary_key).as_ref() == Some(&key))
                {
                    row.merge(&applied);
                }
                Notification::success("Record updated", format!("{primary_key} {key} saved"))
            }
            MutationResult::Deleted(keys) => {
                let primary_key = self.schema.primary_key.clone();
                self.rows
                    .retain(|row| row.key(&primary_key).is_none_or(|key| !keys.contains(&key)));
                self.view.selected.clear();
                let detail = match keys.len() {
                    1 => "1 record deleted".to_owned(),
                    count => format!("{count} records deleted"),
                };
                Notification::success("Records deleted", detail)
            }
        }
    }
}

fn failure_notice(error: &RemoteError) -> Notification {
    let title = match error.operation {
        crate::OperationKind::Insert => "Add failed",
        crate::OperationKind::Update => "Update failed",
        crate::OperationKind::Delete => "Delete failed",
        crate::OperationKind::Read | crate::OperationKind::Introspect => "Request failed",
    };
    let detail = match error.payload_text() {
        Some(payload) => format!("{} {payload}", error.message),
        None => error.message.clone(),
    };
    Notification::error(title, detail)
}

fn merge(into: &mut Step, other: Step) {
    into.events.extend(other.events);
    into.effects.extend(other.effects);
}

#[cfg(test)]
mod tests {
    use super::{
        DialogKind, Effect, FetchEffect, FieldEdit, Outcome, Step, TableCommand, TableController,
        TableEvent, WriteEffect,
    };
    use crate::{
        ColumnDescriptor, ComputedExpr, DateRange, MutationResult, NotificationKind, OperationKind, Page, Record,
        RecordKey, RemoteError, SchemaResolutionError, SemanticType, TableSchema, Value,
        WriteRequest,
    };
    use std::ops::Range;
    use time::Date;
    use time::macros::date;

    fn schema() -> TableSchema {
        let mut schema = TableSchema::new("material_purchase").with_columns(vec![
            ColumnDescriptor::new("id").table_only(),
            ColumnDescriptor::new("material"),
            ColumnDescriptor::new("price").typed(SemanticType::Number),
            ColumnDescriptor::new("delivered_on").typed(SemanticType::Date),
            ColumnDescriptor::new("created_at").typed(SemanticType::Date),
        ]);
        schema.date_filter_column = Some("created_at".to_owned());
        schema
    }

    fn fixed_today() -> Date {
        date!(2026 - 05 - 01)
    }

    fn controller() -> TableController {
        TableController::new(schema()).with_clock(fixed_today)
    }

    fn rows(ids: Range<usize>) -> Vec<Record> {
        ids.map(|id| {
            Record::new()
                .with("id", Value::Number(id as f64))
                .with("material", Value::text(format!("m{id}")))
                .with("price", Value::Number(10.0))
        })
        .collect()
    }

    fn fetch_of(step: &Step) -> FetchEffect {
        step.effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Fetch(fetch) => Some(fetch.clone()),
                _ => None,
            })
            .expect("fetch effect")
    }

    fn write_of(step: &Step) -> WriteEffect {
        step.effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Write(write) => Some(write.clone()),
                _ => None,
            })
            .expect("write effect")
    }

    fn load(controller: &mut TableController, step: &Step, total: usize, records: Vec<Record>) -> Step {
        controller.apply(Outcome::Fetched {
            fetch: fetch_of(step),
            result: Ok(Page { records, total }),
        })
    }

    fn mounted() -> TableController {
        let mut controller = controller();
        let step = controller.dispatch(TableCommand::Mount);
        load(&mut controller, &step, 25, rows(1..11));
        controller
    }

    #[test]
    fn mount_resolves_schema_and_fetches_first_page() {
        let mut controller = controller();
        let step = controller.dispatch(TableCommand::Mount);
        assert!(step.effects.contains(&Effect::ResolveSchema {
            collection: "material_purchase".to_owned(),
        }));
        let fetch = fetch_of(&step);
        assert_eq!(fetch.query.page, 1);
        assert_eq!(fetch.query.page_size, 10);
        assert!(controller.is_loading());

        let loaded = load(&mut controller, &step, 25, rows(1..11));
        assert_eq!(loaded.events, vec![TableEvent::PageLoaded { page: 1, total: 25 }]);
        assert_eq!(controller.rendered_rows().len(), 10);
        assert_eq!(controller.total_pages(), 3);
        assert_eq!(controller.view().search_column.as_deref(), Some("material"));
    }

    #[test]
    fn search_and_page_size_reset_page_but_date_range_does_not() {
        let mut controller = mounted();
        let step = controller.dispatch(TableCommand::NextPage);
        load(&mut controller, &step, 25, rows(11..21));
        assert_eq!(controller.view().page, 2);

        let step = controller.dispatch(TableCommand::SetDateRange(DateRange::new(
            date!(2026 - 01 - 01),
            date!(2026 - 12 - 31),
        )));
        assert_eq!(controller.view().page, 2);
        assert!(fetch_of(&step).query.date.is_some());

        controller.dispatch(TableCommand::SetSearch("maize".to_owned()));
        assert_eq!(controller.view().page, 1);

        controller.dispatch(TableCommand::GoToPage(2));
        assert_eq!(controller.view().page, 2);
        controller.dispatch(TableCommand::SetPageSize(20));
        assert_eq!(controller.view().page, 1);
        assert_eq!(controller.view().page_size, 20);
    }

    #[test]
    fn out_of_range_pages_are_rejected() {
        let mut controller = mounted();
        let step = controller.dispatch(TableCommand::GoToPage(4));
        assert!(step.effects.is_empty());
        assert_eq!(controller.view().page, 1);
        assert!(controller.status().is_some_and(|status| status.contains("out of range")));

        let step = controller.dispatch(TableCommand::GoToPage(3));
        load(&mut controller, &step, 25, rows(21..26));
        assert!(!controller.has_next_page());
        let step = controller.dispatch(TableCommand::NextPage);
        assert!(step.effects.is_empty());
        assert_eq!(controller.view().page, 3);
    }

    #[test]
    fn stale_fetch_results_are_discarded() {
        let mut controller = controller();
        let first = controller.dispatch(TableCommand::Mount);
        let second = controller.dispatch(TableCommand::SetSearch("maize".to_owned()));

        let stale = load(&mut controller, &first, 25, rows(1..11));
        assert!(stale.is_empty());
        assert!(controller.rendered_rows().is_empty());
        assert!(controller.is_loading());

        load(&mut controller, &second, 1, rows(1..2));
        assert_eq!(controller.rendered_rows().len(), 1);
        assert_eq!(controller.total(), 1);
    }

    #[test]
    fn revisiting_a_page_is_served_from_cache() {
        let mut controller = mounted();
        let step = controller.dispatch(TableCommand::NextPage);
        load(&mut controller, &step, 25, rows(11..21));

        let back = controller.dispatch(TableCommand::PreviousPage);
        assert!(back.effects.is_empty());
        assert_eq!(back.events, vec![TableEvent::PageLoaded { page: 1, total: 25 }]);
    }

    #[test]
    fn shrinking_total_clamps_to_last_page() {
        let mut controller = mounted();
        let step = controller.dispatch(TableCommand::GoToPage(3));
        load(&mut controller, &step, 25, rows(21..26));

        let step = controller.dispatch(TableCommand::SetDateRange(DateRange::month_of(date!(
            2026 - 03 - 01
        ))));
        assert_eq!(fetch_of(&step).query.page, 3);
        let clamped = load(&mut controller, &step, 4, Vec::new());
        assert_eq!(controller.view().page, 1);
        assert_eq!(fetch_of(&clamped).query.page, 1);
    }

    #[test]
    fn read_failure_keeps_last_page_visible() {
        let mut controller = mounted();
        let step = controller.dispatch(TableCommand::NextPage);
        let failed = controller.apply(Outcome::Fetched {
            fetch: fetch_of(&step),
            result: Err(RemoteError::read("timeout")),
        });
        assert_eq!(failed.events, vec![TableEvent::ReadFailed("timeout".to_owned())]);
        assert_eq!(controller.rendered_rows().len(), 10);
        assert_eq!(controller.read_error(), Some("timeout"));
    }

    #[test]
    fn delete_with_empty_selection_is_a_no_op() {
        let mut controller = mounted();
        let step = controller.dispatch(TableCommand::RequestDelete);
        assert!(step.effects.is_empty());
        assert_eq!(controller.status(), Some("nothing selected"));
        assert!(controller.delete_dialog().is_none());
    }

    #[test]
    fn confirmed_delete_clears_selection_and_refetches() {
        let mut controller = mounted();
        controller.dispatch(TableCommand::ToggleSelection(RecordKey::from(1)));
        controller.dispatch(TableCommand::ToggleSelection(RecordKey::from(2)));
        let step = controller.dispatch(TableCommand::RequestDelete);
        assert!(step.effects.is_empty());
        assert_eq!(controller.focused_dialog(), Some(DialogKind::Delete));

        let step = controller.dispatch(TableCommand::ConfirmDelete);
        let write = write_of(&step);
        assert_eq!(
            write.request,
            WriteRequest::Delete(vec![RecordKey::from(1), RecordKey::from(2)])
        );

        let done = controller.apply(Outcome::Written {
            id: write.id,
            result: Ok(MutationResult::Deleted(vec![RecordKey::from(1), RecordKey::from(2)])),
        });
        assert!(controller.view().selected.is_empty());
        assert!(controller.delete_dialog().is_none());
        assert_eq!(controller.rendered_rows().len(), 8);
        assert!(done.events.contains(&TableEvent::DialogClosed(DialogKind::Delete)));
        assert_eq!(controller.cache().epoch("material_purchase"), 1);
        assert_eq!(fetch_of(&done).query.page, 1);
    }

    #[test]
    fn unchanged_edit_closes_without_a_write() {
        let mut controller = mounted();
        let record = controller.rendered_rows()[0].clone();
        controller.dispatch(TableCommand::OpenEdit(record));
        let step = controller.dispatch(TableCommand::SaveDialog);
        assert!(step.effects.is_empty());
        assert!(step.events.contains(&TableEvent::DialogClosed(DialogKind::Edit)));
        assert!(controller.edit_dialog().is_none());
    }

    #[test]
    fn edit_sends_only_changed_fields() {
        let mut controller = mounted();
        let record = controller.rendered_rows()[0].clone();
        controller.dispatch(TableCommand::OpenEdit(record));
        controller.dispatch(TableCommand::EditField {
            field: "price".to_owned(),
            edit: FieldEdit::Replace("120".to_owned()),
        });
        let step = controller.dispatch(TableCommand::SaveDialog);
        let write = write_of(&step);
        assert_eq!(
            write.request,
            WriteRequest::Update {
                key: RecordKey::from(1),
                fields: Record::new().with("price", Value::Number(120.0)),
            }
        );

        let applied = Record::new()
            .with("id", Value::Number(1.0))
            .with("price", Value::Number(120.0));
        let done = controller.apply(Outcome::Written {
            id: write.id,
            result: Ok(MutationResult::Updated {
                key: RecordKey::from(1),
                applied,
            }),
        });
        assert!(controller.edit_dialog().is_none());
        assert_eq!(
            controller.rendered_rows()[0].get("price"),
            Some(&Value::Number(120.0))
        );
        assert!(done.effects.iter().any(|effect| matches!(effect, Effect::Fetch(_))));
    }

    #[test]
    fn numeric_field_rejects_letters() {
        let mut controller = mounted();
        let record = controller.rendered_rows()[0].clone();
        controller.dispatch(TableCommand::OpenEdit(record));
        let step = controller.dispatch(TableCommand::EditField {
            field: "price".to_owned(),
            edit: FieldEdit::Push('x'),
        });
        assert_eq!(
            step.events,
            vec![TableEvent::InputRejected {
                field: "price".to_owned()
            }]
        );
    }

    #[test]
    fn writes_on_the_same_key_run_in_order() {
        let mut controller = mounted();
        let record = controller.rendered_rows()[0].clone();
        controller.dispatch(TableCommand::OpenEdit(record));
        controller.dispatch(TableCommand::EditField {
            field: "price".to_owned(),
            edit: FieldEdit::Replace("120".to_owned()),
        });
        let update = write_of(&controller.dispatch(TableCommand::SaveDialog));

        controller.dispatch(TableCommand::ToggleSelection(RecordKey::from(1)));
        controller.dispatch(TableCommand::RequestDelete);
        let queued = controller.dispatch(TableCommand::ConfirmDelete);
        assert!(queued.effects.is_empty());

        let done = controller.apply(Outcome::Written {
            id: update.id,
            result: Ok(MutationResult::Updated {
                key: RecordKey::from(1),
                applied: Record::new(),
            }),
        });
        let delete = write_of(&done);
        assert_eq!(delete.request, WriteRequest::Delete(vec![RecordKey::from(1)]));
    }

    #[test]
    fn failed_insert_keeps_dialog_and_values() {
        let mut controller = mounted();
        controller.dispatch(TableCommand::OpenAdd);
        controller.dispatch(TableCommand::EditField {
            field: "material".to_owned(),
            edit: FieldEdit::Replace("Maize".to_owned()),
        });
        let write = write_of(&controller.dispatch(TableCommand::SaveDialog));
        let WriteRequest::Insert(record) = &write.request else {
            panic!("expected insert");
        };
        assert_eq!(record.get("delivered_on"), Some(&Value::date(fixed_today())));
        assert!(!record.contains("id"));
        assert!(!record.contains("created_at"));

        let error = RemoteError::new(OperationKind::Insert, "duplicate key")
            .with_payload(write.request.payload("id"));
        let failed = controller.apply(Outcome::Written {
            id: write.id,
            result: Err(error),
        });

        let dialog = controller.add_dialog().expect("dialog stays open");
        assert_eq!(dialog.form.text("material"), "Maize");
        assert_eq!(dialog.error.as_deref(), Some("duplicate key"));
        assert!(dialog.saving.is_none());
        let notice = failed
            .events
            .iter()
            .find_map(|event| match event {
                TableEvent::Notify(notice) => Some(notice.clone()),
                _ => None,
            })
            .expect("notification");
        assert_eq!(notice.kind, NotificationKind::Error);
        assert!(notice.detail.contains("Maize"));
        assert!(failed.effects.is_empty());
    }

    #[test]
    fn sorting_by_computed_column_uses_evaluated_values() -> anyhow::Result<()> {
        let schema = TableSchema::new("material_purchase").with_columns(vec![
            ColumnDescriptor::new("id").table_only(),
            ColumnDescriptor::new("quantity").typed(SemanticType::Number),
            ColumnDescriptor::new("price").typed(SemanticType::Number),
            ColumnDescriptor::new("amount")
                .typed(SemanticType::Number)
                .computed(ComputedExpr::parse("quantity * price")?),
        ]);
        let mut controller = TableController::new(schema).with_clock(fixed_today);
        let step = controller.dispatch(TableCommand::Mount);
        let purchase = |id: f64, quantity: f64, price: f64| {
            Record::new()
                .with("id", Value::Number(id))
                .with("quantity", Value::Number(quantity))
                .with("price", Value::Number(price))
        };
        load(
            &mut controller,
            &step,
            2,
            vec![purchase(1.0, 10.0, 10.0), purchase(2.0, 1.0, 1.0)],
        );

        let ids = |controller: &TableController| {
            controller
                .rendered_rows()
                .iter()
                .map(|record| record.get("id").cloned())
                .collect::<Vec<_>>()
        };
        controller.dispatch(TableCommand::CycleSort("amount".to_owned()));
        assert_eq!(
            ids(&controller),
            vec![Some(Value::Number(2.0)), Some(Value::Number(1.0))]
        );
        controller.dispatch(TableCommand::CycleSort("amount".to_owned()));
        assert_eq!(
            ids(&controller),
            vec![Some(Value::Number(1.0)), Some(Value::Number(2.0))]
        );
        Ok(())
    }

    #[test]
    fn last_visible_column_cannot_be_hidden() {
        let mut controller = mounted();
        for field in ["id", "material", "price", "delivered_on"] {
            controller.dispatch(TableCommand::ToggleColumn(field.to_owned()));
        }
        assert_eq!(controller.visible_columns().len(), 1);
        controller.dispatch(TableCommand::ToggleColumn("created_at".to_owned()));
        assert_eq!(controller.visible_columns().len(), 1);

        controller.dispatch(TableCommand::ShowAllColumns);
        assert_eq!(controller.visible_columns().len(), 5);
    }

    #[test]
    fn degraded_schema_is_requested_again_on_refresh() {
        let mut controller = mounted();
        let step = controller.apply(Outcome::SchemaResolved(Err(SchemaResolutionError::Empty {
            collection: "material_purchase".to_owned(),
        })));
        assert!(matches!(step.events[0], TableEvent::SchemaDegraded(_)));

        let refresh = controller.dispatch(TableCommand::Refresh);
        assert!(refresh.effects.contains(&Effect::ResolveSchema {
            collection: "material_purchase".to_owned(),
        }));
    }
}
