// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Tabs};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tabula_app::{
    Backend, BoundInput, ColumnDescriptor, ColumnTypeResolver, DateRange, DialogKind, Effect,
    FieldEdit, InputKind, NotificationKind, Outcome, PAGE_SIZES, Record, SemanticType,
    ShellCommand, SortDirection, SortSpec, Step, TableCommand, TableController, TableEvent, Value,
    format_date, lookup, parse_date, perform,
};
use time::{Date, OffsetDateTime};

const CELL_MAX_CHARS: usize = 24;
const STATUS_TTL: Duration = Duration::from_secs(4);

/// Runs controller effects away from the draw loop and reports each
/// outcome back as an [`InternalEvent::Outcome`].
pub trait EffectRuntime {
    fn spawn_effect(&mut self, tab: usize, effect: Effect, tx: Sender<InternalEvent>);
}

/// One thread per effect over a shared backend. Schema lookups share a
/// process-wide resolver so each collection is introspected once.
pub struct WorkerRuntime<B: Backend + ?Sized + 'static> {
    backend: Arc<B>,
    resolver: Arc<Mutex<ColumnTypeResolver>>,
}

impl<B: Backend + ?Sized + 'static> WorkerRuntime<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            resolver: Arc::new(Mutex::new(ColumnTypeResolver::new())),
        }
    }
}

impl<B: Backend + ?Sized + 'static> EffectRuntime for WorkerRuntime<B> {
    fn spawn_effect(&mut self, tab: usize, effect: Effect, tx: Sender<InternalEvent>) {
        let backend = Arc::clone(&self.backend);
        let resolver = Arc::clone(&self.resolver);
        tracing::debug!(tab, effect = effect_label(&effect), "spawning effect");
        thread::spawn(move || {
            let outcome = run_effect(backend.as_ref(), &resolver, &effect);
            let _ = tx.send(InternalEvent::Outcome { tab, outcome });
        });
    }
}

fn effect_label(effect: &Effect) -> &'static str {
    match effect {
        Effect::ResolveSchema { .. } => "resolve-schema",
        Effect::Fetch(_) => "fetch",
        Effect::Write(_) => "write",
    }
}

fn lock_resolver(resolver: &Mutex<ColumnTypeResolver>) -> MutexGuard<'_, ColumnTypeResolver> {
    resolver.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_effect<B: Backend + ?Sized>(
    backend: &B,
    resolver: &Mutex<ColumnTypeResolver>,
    effect: &Effect,
) -> Outcome {
    let Effect::ResolveSchema { collection } = effect else {
        return perform(backend, effect);
    };
    if let Some(resolved) = lock_resolver(resolver).cached(collection).cloned() {
        return Outcome::SchemaResolved(Ok(resolved));
    }
    // The lock is not held across the network call.
    let looked_up = lookup(backend, collection);
    Outcome::SchemaResolved(
        looked_up.map(|columns| lock_resolver(resolver).remember(collection, &columns)),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
    Outcome { tab: usize, outcome: Outcome },
}

/// Single-line input that temporarily owns the keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Search(String),
    DateRange(String),
    GoToPage(String),
}

impl Prompt {
    fn buffer_mut(&mut self) -> &mut String {
        match self {
            Self::Search(buffer) | Self::DateRange(buffer) | Self::GoToPage(buffer) => buffer,
        }
    }
}

#[derive(Debug)]
pub struct TableTab {
    controller: TableController,
    row: usize,
    column: usize,
    form_field: usize,
}

impl TableTab {
    fn new(controller: TableController) -> Self {
        Self {
            controller,
            row: 0,
            column: 0,
            form_field: 0,
        }
    }

    pub fn controller(&self) -> &TableController {
        &self.controller
    }

    fn current_row(&self) -> Option<Record> {
        self.controller.rendered_rows().into_iter().nth(self.row)
    }

    fn current_column(&self) -> Option<&ColumnDescriptor> {
        self.controller.visible_columns().get(self.column).copied()
    }

    fn clamp_cursor(&mut self) {
        let rows = self.controller.rendered_rows().len();
        let columns = self.controller.visible_columns().len();
        self.row = self.row.min(rows.saturating_sub(1));
        self.column = self.column.min(columns.saturating_sub(1));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusLine {
    text: String,
    error: bool,
}

/// Everything the terminal shell owns: one tab per configured collection,
/// the prompt, and the transient status line.
#[derive(Debug)]
pub struct Shell {
    tabs: Vec<TableTab>,
    active: usize,
    prompt: Option<Prompt>,
    help_visible: bool,
    status: Option<StatusLine>,
    status_token: u64,
    in_flight: usize,
}

impl Shell {
    pub fn new(controllers: Vec<TableController>) -> Self {
        Self {
            tabs: controllers.into_iter().map(TableTab::new).collect(),
            active: 0,
            prompt: None,
            help_visible: false,
            status: None,
            status_token: 0,
            in_flight: 0,
        }
    }

    pub fn tabs(&self) -> &[TableTab] {
        &self.tabs
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_tab(&self) -> Option<&TableTab> {
        self.tabs.get(self.active)
    }

    pub fn prompt(&self) -> Option<&Prompt> {
        self.prompt.as_ref()
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status.as_ref().map(|status| status.text.as_str())
    }

    /// Effects handed to the runtime whose outcome has not come back yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

pub fn run_app<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    commands: &Receiver<ShellCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (internal_tx, internal_rx) = mpsc::channel();
    mount_all(shell, runtime, &internal_tx);

    let mut result = Ok(());
    loop {
        process_shell_commands(shell, runtime, &internal_tx, commands);
        process_internal_events(shell, runtime, &internal_tx, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, shell)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = match event::poll(Duration::from_millis(120)).context("poll event") {
            Ok(has_event) => has_event,
            Err(error) => {
                result = Err(error);
                break;
            }
        };
        if !has_event {
            continue;
        }
        match event::read().context("read event") {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if handle_key_event(shell, runtime, &internal_tx, key) {
                    break;
                }
            }
            Ok(_) => {}
            Err(error) => {
                result = Err(error);
                break;
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

pub fn mount_all<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
) {
    for index in 0..shell.tabs.len() {
        dispatch(shell, runtime, tx, index, TableCommand::Mount);
    }
}

fn dispatch<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    tab: usize,
    command: TableCommand,
) {
    let Some(entry) = shell.tabs.get_mut(tab) else {
        return;
    };
    let step = entry.controller.dispatch(command);
    handle_step(shell, runtime, tx, tab, step);
}

fn handle_step<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    tab: usize,
    step: Step,
) {
    for event in step.events {
        handle_table_event(shell, tx, tab, event);
    }
    for effect in step.effects {
        shell.in_flight += 1;
        runtime.spawn_effect(tab, effect, tx.clone());
    }
}

fn handle_table_event(shell: &mut Shell, tx: &Sender<InternalEvent>, tab: usize, event: TableEvent) {
    match event {
        TableEvent::Status(message) => emit_status(shell, tx, message, false),
        TableEvent::Notify(notification) => emit_status(
            shell,
            tx,
            format!("{}: {}", notification.title, notification.detail),
            notification.kind == NotificationKind::Error,
        ),
        TableEvent::ReadFailed(message) => {
            emit_status(shell, tx, format!("load failed: {message}"), true);
        }
        TableEvent::SchemaDegraded(message) => emit_status(
            shell,
            tx,
            format!("column types unavailable, showing text ({message})"),
            true,
        ),
        TableEvent::InputRejected { field } => {
            emit_status(shell, tx, format!("{field} accepts numbers only"), true);
        }
        TableEvent::FormInvalid(error) => emit_status(shell, tx, error.to_string(), true),
        TableEvent::DialogOpened(_) => {
            if let Some(entry) = shell.tabs.get_mut(tab) {
                entry.form_field = 0;
            }
        }
        TableEvent::PageLoaded { .. } | TableEvent::ViewChanged => {
            if let Some(entry) = shell.tabs.get_mut(tab) {
                entry.clamp_cursor();
            }
        }
        TableEvent::SchemaResolved
        | TableEvent::LoadingStarted
        | TableEvent::SelectionChanged(_)
        | TableEvent::DialogClosed(_)
        | TableEvent::FormChanged => {}
    }
}

pub fn process_internal_events<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == shell.status_token => {
                shell.status = None;
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::Outcome { tab, outcome } => {
                shell.in_flight = shell.in_flight.saturating_sub(1);
                let Some(entry) = shell.tabs.get_mut(tab) else {
                    continue;
                };
                let step = entry.controller.apply(outcome);
                handle_step(shell, runtime, tx, tab, step);
            }
        }
    }
}

/// Routes commands sent from outside the shell to the tab that owns the
/// named collection.
pub fn process_shell_commands<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    commands: &Receiver<ShellCommand>,
) {
    while let Ok(command) = commands.try_recv() {
        match command {
            ShellCommand::OpenEdit { collection, record } => {
                let target = shell
                    .tabs
                    .iter()
                    .position(|tab| tab.controller.collection() == collection);
                match target {
                    Some(index) => {
                        shell.active = index;
                        shell.prompt = None;
                        shell.help_visible = false;
                        dispatch(shell, runtime, tx, index, TableCommand::OpenEdit(record));
                    }
                    None => {
                        tracing::warn!(%collection, "edit request for a collection with no tab");
                        emit_status(shell, tx, format!("no tab shows {collection}"), true);
                    }
                }
            }
        }
    }
}

fn schedule_status_clear(tx: &Sender<InternalEvent>, token: u64) {
    let sender = tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_TTL);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(shell: &mut Shell, tx: &Sender<InternalEvent>, text: impl Into<String>, error: bool) {
    shell.status = Some(StatusLine {
        text: text.into(),
        error,
    });
    shell.status_token = shell.status_token.saturating_add(1);
    schedule_status_clear(tx, shell.status_token);
}

/// Returns true when the shell should exit.
pub fn handle_key_event<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }
    if shell.help_visible {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
            shell.help_visible = false;
        }
        return false;
    }
    if shell.prompt.is_some() {
        handle_prompt_key(shell, runtime, tx, key);
        return false;
    }

    let active = shell.active;
    let Some(tab) = shell.tabs.get(active) else {
        return false;
    };
    if let Some(kind) = tab.controller.focused_dialog() {
        handle_dialog_key(shell, runtime, tx, kind, key);
        return false;
    }

    match nav_action_for_key(key) {
        Some(action) => apply_nav_action(shell, runtime, tx, action),
        None => false,
    }
}

fn handle_prompt_key<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    key: KeyEvent,
) {
    let Some(prompt) = shell.prompt.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Esc => shell.prompt = None,
        KeyCode::Backspace => {
            prompt.buffer_mut().pop();
        }
        KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
            prompt.buffer_mut().push(ch);
        }
        KeyCode::Enter => {
            let Some(prompt) = shell.prompt.take() else {
                return;
            };
            match prompt_command(&prompt, today()) {
                Ok(command) => {
                    let active = shell.active;
                    dispatch(shell, runtime, tx, active, command);
                }
                Err(message) => emit_status(shell, tx, message, true),
            }
        }
        _ => {}
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn prompt_command(prompt: &Prompt, today: Date) -> Result<TableCommand, String> {
    match prompt {
        Prompt::Search(term) => Ok(TableCommand::SetSearch(term.clone())),
        Prompt::DateRange(raw) => Ok(match parse_date_range(raw, today)? {
            Some(range) => TableCommand::SetDateRange(range),
            None => TableCommand::ClearDateRange,
        }),
        Prompt::GoToPage(raw) => raw
            .trim()
            .parse::<usize>()
            .map(TableCommand::GoToPage)
            .map_err(|_| format!("{raw:?} is not a page number")),
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM`, `from..to`, or `month` for the current
/// month. Blank clears the filter.
fn parse_date_range(raw: &str, today: Date) -> Result<Option<DateRange>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if raw == "month" {
        return Ok(Some(DateRange::month_of(today)));
    }
    if let Some((from, to)) = raw.split_once("..") {
        let from = parse_date(from).ok_or_else(|| format!("{:?} is not a date", from.trim()))?;
        let to = parse_date(to).ok_or_else(|| format!("{:?} is not a date", to.trim()))?;
        return Ok(Some(DateRange::new(from, to)));
    }
    if let Some(day) = parse_date(raw) {
        return Ok(Some(DateRange::new(day, day)));
    }
    if let Some(first) = parse_date(&format!("{raw}-01")) {
        return Ok(Some(DateRange::month_of(first)));
    }
    Err(format!("{raw:?} is not a date, a month, or a from..to range"))
}

#[derive(Debug, Clone, PartialEq)]
enum DialogAction {
    Command(TableCommand),
    MoveField(isize),
    Ignore,
}

fn dialog_action_for_key(
    kind: DialogKind,
    inputs: &[BoundInput],
    focused: usize,
    key: KeyEvent,
) -> DialogAction {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => return DialogAction::Command(TableCommand::CancelDialog),
        KeyCode::Enter => return DialogAction::Command(TableCommand::SaveDialog),
        KeyCode::Char('s') if ctrl => return DialogAction::Command(TableCommand::SaveDialog),
        _ => {}
    }
    if kind == DialogKind::Delete {
        return match key.code {
            KeyCode::Char('y') => DialogAction::Command(TableCommand::ConfirmDelete),
            KeyCode::Char('n') => DialogAction::Command(TableCommand::CancelDialog),
            _ => DialogAction::Ignore,
        };
    }
    match key.code {
        KeyCode::Tab | KeyCode::Down => return DialogAction::MoveField(1),
        KeyCode::BackTab | KeyCode::Up => return DialogAction::MoveField(-1),
        _ => {}
    }
    if ctrl {
        return DialogAction::Ignore;
    }

    let Some(input) = inputs.get(focused) else {
        return DialogAction::Ignore;
    };
    let edit = match (key.code, input.kind) {
        (KeyCode::Char(' '), InputKind::Toggle) => FieldEdit::Toggle,
        (_, InputKind::Toggle) => return DialogAction::Ignore,
        (KeyCode::Char(ch), _) => FieldEdit::Push(ch),
        (KeyCode::Backspace, _) => FieldEdit::Pop,
        _ => return DialogAction::Ignore,
    };
    DialogAction::Command(TableCommand::EditField {
        field: input.field.clone(),
        edit,
    })
}

fn handle_dialog_key<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    kind: DialogKind,
    key: KeyEvent,
) {
    let active = shell.active;
    let Some(tab) = shell.tabs.get_mut(active) else {
        return;
    };
    let inputs = tab.controller.form_inputs(kind);
    match dialog_action_for_key(kind, &inputs, tab.form_field, key) {
        DialogAction::Command(command) => dispatch(shell, runtime, tx, active, command),
        DialogAction::MoveField(delta) => {
            tab.form_field = wrap_index(tab.form_field, delta, inputs.len());
        }
        DialogAction::Ignore => {}
    }
}

fn wrap_index(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let len = len as isize;
    (current as isize + delta).rem_euclid(len) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavAction {
    Help,
    MoveRow(isize),
    MoveColumn(isize),
    FirstRow,
    LastRow,
    NextTab,
    PreviousTab,
    NextPage,
    PreviousPage,
    Refresh,
    CyclePageSize,
    Search,
    SearchCurrentColumn,
    DateRange,
    GoToPage,
    Sort,
    HideColumn,
    ShowAllColumns,
    ToggleRow,
    SelectAll,
    ClearSelection,
    Add,
    Edit,
    Delete,
}

fn nav_action_for_key(key: KeyEvent) -> Option<NavAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return None;
    }
    let action = match key.code {
        KeyCode::Char('?') => NavAction::Help,
        KeyCode::Char('j') | KeyCode::Down => NavAction::MoveRow(1),
        KeyCode::Char('k') | KeyCode::Up => NavAction::MoveRow(-1),
        KeyCode::Char('h') | KeyCode::Left => NavAction::MoveColumn(-1),
        KeyCode::Char('l') | KeyCode::Right => NavAction::MoveColumn(1),
        KeyCode::Char('g') => NavAction::FirstRow,
        KeyCode::Char('G') => NavAction::LastRow,
        KeyCode::Tab | KeyCode::Char('f') => NavAction::NextTab,
        KeyCode::BackTab | KeyCode::Char('b') => NavAction::PreviousTab,
        KeyCode::Char('n') | KeyCode::PageDown => NavAction::NextPage,
        KeyCode::Char('p') | KeyCode::PageUp => NavAction::PreviousPage,
        KeyCode::Char('r') => NavAction::Refresh,
        KeyCode::Char('z') => NavAction::CyclePageSize,
        KeyCode::Char('/') => NavAction::Search,
        KeyCode::Char('F') => NavAction::SearchCurrentColumn,
        KeyCode::Char('T') => NavAction::DateRange,
        KeyCode::Char(':') => NavAction::GoToPage,
        KeyCode::Char('s') => NavAction::Sort,
        KeyCode::Char('c') => NavAction::HideColumn,
        KeyCode::Char('C') => NavAction::ShowAllColumns,
        KeyCode::Char(' ') => NavAction::ToggleRow,
        KeyCode::Char('A') => NavAction::SelectAll,
        KeyCode::Esc => NavAction::ClearSelection,
        KeyCode::Char('a') => NavAction::Add,
        KeyCode::Char('e') | KeyCode::Enter => NavAction::Edit,
        KeyCode::Char('d') => NavAction::Delete,
        _ => return None,
    };
    Some(action)
}

fn next_page_size(current: usize) -> usize {
    PAGE_SIZES
        .iter()
        .position(|size| *size == current)
        .map_or(PAGE_SIZES[0], |index| PAGE_SIZES[(index + 1) % PAGE_SIZES.len()])
}

/// Controller command for a navigation action, resolved against the cursor.
fn table_command_for_action(tab: &TableTab, action: NavAction) -> Option<TableCommand> {
    let field = || tab.current_column().map(|column| column.field.clone());
    match action {
        NavAction::NextPage => Some(TableCommand::NextPage),
        NavAction::PreviousPage => Some(TableCommand::PreviousPage),
        NavAction::Refresh => Some(TableCommand::Refresh),
        NavAction::CyclePageSize => Some(TableCommand::SetPageSize(next_page_size(
            tab.controller.view().page_size,
        ))),
        NavAction::SearchCurrentColumn => field().map(TableCommand::SetSearchColumn),
        NavAction::Sort => field().map(TableCommand::CycleSort),
        NavAction::HideColumn => field().map(TableCommand::ToggleColumn),
        NavAction::ShowAllColumns => Some(TableCommand::ShowAllColumns),
        NavAction::ToggleRow => tab
            .current_row()
            .and_then(|row| row.key(&tab.controller.schema().primary_key))
            .map(TableCommand::ToggleSelection),
        NavAction::SelectAll => Some(TableCommand::SelectAllRendered),
        NavAction::ClearSelection => Some(TableCommand::ClearSelection),
        NavAction::Add => Some(TableCommand::OpenAdd),
        NavAction::Edit => tab.current_row().map(TableCommand::OpenEdit),
        NavAction::Delete => Some(TableCommand::RequestDelete),
        NavAction::Help
        | NavAction::MoveRow(_)
        | NavAction::MoveColumn(_)
        | NavAction::FirstRow
        | NavAction::LastRow
        | NavAction::NextTab
        | NavAction::PreviousTab
        | NavAction::Search
        | NavAction::DateRange
        | NavAction::GoToPage => None,
    }
}

fn apply_nav_action<R: EffectRuntime>(
    shell: &mut Shell,
    runtime: &mut R,
    tx: &Sender<InternalEvent>,
    action: NavAction,
) -> bool {
    let active = shell.active;
    let tab_count = shell.tabs.len();
    let Some(tab) = shell.tabs.get_mut(active) else {
        return false;
    };
    match action {
        NavAction::Help => shell.help_visible = true,
        NavAction::MoveRow(delta) => {
            let rows = tab.controller.rendered_rows().len();
            tab.row = tab
                .row
                .saturating_add_signed(delta)
                .min(rows.saturating_sub(1));
        }
        NavAction::MoveColumn(delta) => {
            let columns = tab.controller.visible_columns().len();
            tab.column = tab
                .column
                .saturating_add_signed(delta)
                .min(columns.saturating_sub(1));
        }
        NavAction::FirstRow => tab.row = 0,
        NavAction::LastRow => tab.row = tab.controller.rendered_rows().len().saturating_sub(1),
        NavAction::NextTab => shell.active = wrap_index(active, 1, tab_count),
        NavAction::PreviousTab => shell.active = wrap_index(active, -1, tab_count),
        NavAction::Search => {
            shell.prompt = Some(Prompt::Search(tab.controller.view().search.clone()));
        }
        NavAction::DateRange => shell.prompt = Some(Prompt::DateRange(String::new())),
        NavAction::GoToPage => shell.prompt = Some(Prompt::GoToPage(String::new())),
        other => {
            if let Some(command) = table_command_for_action(tab, other) {
                dispatch(shell, runtime, tx, active, command);
            }
        }
    }
    false
}

fn format_cell(value: &Value, semantic_type: SemanticType) -> String {
    match (value, semantic_type) {
        (Value::Null, _) => String::new(),
        (Value::Bool(true), _) => "yes".to_owned(),
        (Value::Bool(false), _) => "no".to_owned(),
        (Value::DateTime(instant), SemanticType::Date) => format_date(instant.date()),
        (Value::Number(number), _) if number.fract() != 0.0 => format!("{number:.2}"),
        (other, _) => other.canonical(),
    }
}

fn truncate_label(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let truncated: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{truncated}…")
    } else {
        truncated
    }
}

fn header_label(column: &ColumnDescriptor, sort: Option<&SortSpec>) -> String {
    let mut label = column.label().to_owned();
    if let Some(spec) = sort.filter(|spec| spec.field == column.field) {
        label.push_str(match spec.direction {
            SortDirection::Asc => " ↑",
            SortDirection::Desc => " ↓",
        });
    }
    label
}

/// Footer summary. Previous/next hints only appear when the move is allowed.
fn pagination_text(controller: &TableController) -> String {
    let view = controller.view();
    let mut parts = vec![
        format!("page {} of {}", view.page, controller.total_pages().max(1)),
        format!("{} rows", controller.total()),
        format!("{} per page", view.page_size),
    ];
    if controller.has_previous_page() {
        parts.push("p prev".to_owned());
    }
    if controller.has_next_page() {
        parts.push("n next".to_owned());
    }
    if !view.search.trim().is_empty() {
        let column = view.search_column.as_deref().unwrap_or("?");
        parts.push(format!("search {column}~{:?}", view.search.trim()));
    }
    if let Some(range) = view.date_range {
        parts.push(format!(
            "dates {}..{}",
            format_date(range.from()),
            format_date(range.to())
        ));
    }
    if !view.selected.is_empty() {
        parts.push(format!("{} selected", view.selected.len()));
    }
    if controller.is_loading() {
        parts.push("loading…".to_owned());
    }
    parts.join(" | ")
}

fn prompt_text(prompt: &Prompt, controller: &TableController) -> String {
    match prompt {
        Prompt::Search(buffer) => {
            let column = controller
                .view()
                .search_column
                .as_deref()
                .unwrap_or("(no text column)");
            format!("search {column}: {buffer}_")
        }
        Prompt::DateRange(buffer) => {
            format!("dates (YYYY-MM-DD, YYYY-MM, from..to, month; blank clears): {buffer}_")
        }
        Prompt::GoToPage(buffer) => {
            format!("go to page (1..={}): {buffer}_", controller.total_pages().max(1))
        }
    }
}

fn status_text(shell: &Shell) -> String {
    if let (Some(prompt), Some(tab)) = (&shell.prompt, shell.active_tab()) {
        return prompt_text(prompt, &tab.controller);
    }
    let hints = "j/k/h/l move | n/p page | / search | T dates | : page | s sort | c/C cols | space select | a add | e edit | d del | ? help | ctrl+q";
    match &shell.status {
        Some(status) => format!("{} | {hints}", status.text),
        None => hints.to_owned(),
    }
}

fn dialog_title(controller: &TableController, kind: DialogKind) -> String {
    let label = controller.schema().label();
    match (kind, controller.edit_dialog()) {
        (DialogKind::Edit, Some(edit)) => format!("edit {label} {}", edit.key()),
        _ => format!("{} {label}", kind.label()),
    }
}

fn dialog_text(controller: &TableController, kind: DialogKind, focused: usize) -> String {
    let (error, saving) = match kind {
        DialogKind::Add => controller
            .add_dialog()
            .map(|dialog| (dialog.error.clone(), dialog.saving.is_some())),
        DialogKind::Edit => controller
            .edit_dialog()
            .map(|edit| (edit.error.clone(), edit.saving.is_some())),
        DialogKind::Delete => controller
            .delete_dialog()
            .map(|confirm| (confirm.error.clone(), confirm.saving.is_some())),
    }
    .unwrap_or((None, false));

    let mut lines = Vec::new();
    if kind == DialogKind::Delete {
        let count = controller
            .delete_dialog()
            .map_or(0, |confirm| confirm.keys.len());
        let noun = if count == 1 { "record" } else { "records" };
        lines.push(format!("delete {count} {noun}?"));
        lines.push(String::new());
        lines.push("y/enter confirm | n/esc cancel".to_owned());
    } else {
        for (index, input) in controller.form_inputs(kind).iter().enumerate() {
            let marker = if index == focused { ">" } else { " " };
            let hint = input.kind.hint();
            let hint = if hint.is_empty() {
                String::new()
            } else {
                format!("  ({hint})")
            };
            lines.push(format!(
                "{marker} {}: {}{hint}",
                input.label,
                input.value.display()
            ));
        }
        lines.push(String::new());
        lines.push("tab/shift+tab field | enter or ctrl+s save | esc cancel".to_owned());
    }
    if saving {
        lines.push("saving…".to_owned());
    }
    if let Some(error) = error {
        lines.push(format!("error: {error}"));
    }
    lines.join("\n")
}

fn help_overlay_text() -> &'static str {
    "global: ctrl+q quit | ? help\n\
nav: j/k/h/l move | g/G first/last row | tab/shift+tab or f/b switch table\n\
pages: n/p next/prev | : go to page | z page size | r refresh\n\
filter: / search | F search this column | T date range\n\
columns: s sort (asc, desc, off) | c hide | C show all\n\
rows: space select | A select page | esc clear | a add | e/enter edit | d delete\n\
form: tab/shift+tab field | space toggle | enter or ctrl+s save | esc cancel"
}

fn tab_title(tab: &TableTab) -> String {
    let controller = &tab.controller;
    let label = controller.schema().label();
    if controller.read_error().is_some() {
        format!(" {label} ! ")
    } else if controller.is_loading() {
        format!(" {label} … ")
    } else {
        format!(" {label} ")
    }
}

fn empty_table_text(controller: &TableController) -> String {
    if let Some(error) = controller.read_error() {
        return format!("could not load rows: {error}\npress r to retry");
    }
    if controller.is_loading() {
        return "loading…".to_owned();
    }
    let view = controller.view();
    if view.search.trim().is_empty() && view.date_range.is_none() {
        "no rows yet, press a to add one".to_owned()
    } else {
        "no rows match the current filters".to_owned()
    }
}

fn render(frame: &mut ratatui::Frame<'_>, shell: &Shell) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let titles = shell.tabs.iter().map(tab_title).collect::<Vec<String>>();
    let tabs = Tabs::new(titles)
        .block(Block::default().title("tabula").borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .select(shell.active);
    frame.render_widget(tabs, layout[0]);

    let Some(tab) = shell.active_tab() else {
        let empty = Paragraph::new("no tables configured")
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(empty, layout[1]);
        return;
    };

    render_table(frame, layout[1], tab);

    let footer = Paragraph::new(pagination_text(&tab.controller))
        .style(Style::default().fg(Color::Gray));
    frame.render_widget(footer, layout[2]);

    let status_color = match &shell.status {
        Some(status) if status.error => Color::Red,
        Some(_) => Color::Green,
        None => Color::Yellow,
    };
    let status = Paragraph::new(status_text(shell))
        .style(Style::default().fg(status_color))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, layout[3]);

    if let Some(kind) = tab.controller.focused_dialog() {
        let area = centered_rect(70, 60, frame.area());
        frame.render_widget(Clear, area);
        let dialog = Paragraph::new(dialog_text(&tab.controller, kind, tab.form_field)).block(
            Block::default()
                .title(dialog_title(&tab.controller, kind))
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Cyan)),
        );
        frame.render_widget(dialog, area);
    }

    if shell.help_visible {
        let area = centered_rect(80, 60, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn render_table(frame: &mut ratatui::Frame<'_>, area: Rect, tab: &TableTab) {
    let controller = &tab.controller;
    let title = format!("{} ({})", controller.schema().label(), controller.collection());
    let rows = controller.rendered_rows();
    if rows.is_empty() {
        let empty = Paragraph::new(empty_table_text(controller))
            .block(Block::default().title(title).borders(Borders::ALL));
        frame.render_widget(empty, area);
        return;
    }

    let columns = controller.visible_columns();
    let sort = controller.view().sort.as_ref();
    let mut widths = vec![Constraint::Length(1)];
    widths.extend(columns.iter().map(|_| Constraint::Min(8)));

    let header_style = Style::default()
        .fg(Color::White)
        .add_modifier(Modifier::BOLD);
    let mut header_cells = vec![Cell::from(String::new())];
    header_cells.extend(columns.iter().enumerate().map(|(index, column)| {
        let style = if index == tab.column {
            header_style.fg(Color::Cyan)
        } else {
            header_style
        };
        Cell::from(header_label(column, sort)).style(style)
    }));
    let header = Row::new(header_cells);

    let body = rows.iter().enumerate().map(|(row_index, record)| {
        let cursor_row = row_index == tab.row;
        let mark = if controller.is_selected(record) { "●" } else { " " };
        let mut cells = vec![Cell::from(mark)];
        cells.extend(columns.iter().enumerate().map(|(column_index, column)| {
            let semantic_type = controller
                .schema()
                .semantic_type(&column.field, controller.types());
            let text = truncate_label(
                &format_cell(&controller.cell(record, column), semantic_type),
                CELL_MAX_CHARS,
            );
            let mut style = Style::default();
            if cursor_row {
                style = style.bg(Color::DarkGray);
            }
            if cursor_row && column_index == tab.column {
                style = Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD);
            }
            Cell::from(text).style(style)
        }));
        Row::new(cells)
    });

    let table = Table::new(body, widths)
        .header(header)
        .column_spacing(1)
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(table, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{
        DialogAction, EffectRuntime, InternalEvent, NavAction, Prompt, Shell, WorkerRuntime,
        dialog_action_for_key, format_cell, handle_key_event, header_label, mount_all,
        nav_action_for_key, next_page_size, pagination_text, parse_date_range,
        process_internal_events, process_shell_commands, prompt_command, run_effect,
        truncate_label,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};
    use tabula_app::{
        BoundInput, ColumnDescriptor, ColumnTypeResolver, DateRange, DialogKind, Effect, FieldEdit,
        FormValue, InputKind, RecordKey, SemanticType, SortDirection, SortSpec, TableCommand,
        TableController, TableSchema, Value, shell_channel,
    };
    use tabula_testkit::{MemoryGateway, PURCHASE_TABLE, fixture_date, purchase_schema};
    use time::macros::{date, datetime};

    /// Performs effects on the calling thread so tests stay deterministic.
    struct InlineRuntime {
        backend: MemoryGateway,
        resolver: Mutex<ColumnTypeResolver>,
    }

    impl EffectRuntime for InlineRuntime {
        fn spawn_effect(&mut self, tab: usize, effect: Effect, tx: Sender<InternalEvent>) {
            let outcome = run_effect(&self.backend, &self.resolver, &effect);
            let _ = tx.send(InternalEvent::Outcome { tab, outcome });
        }
    }

    struct Harness {
        shell: Shell,
        runtime: InlineRuntime,
        tx: Sender<InternalEvent>,
        rx: Receiver<InternalEvent>,
    }

    impl Harness {
        fn new(controllers: Vec<TableController>, rows: usize) -> Self {
            let (tx, rx) = mpsc::channel();
            let mut harness = Self {
                shell: Shell::new(controllers),
                runtime: InlineRuntime {
                    backend: MemoryGateway::purchases(rows, 5),
                    resolver: Mutex::new(ColumnTypeResolver::new()),
                },
                tx,
                rx,
            };
            mount_all(&mut harness.shell, &mut harness.runtime, &harness.tx);
            harness.pump();
            harness
        }

        fn pump(&mut self) {
            process_internal_events(&mut self.shell, &mut self.runtime, &self.tx, &self.rx);
        }

        fn press(&mut self, code: KeyCode) -> bool {
            self.press_with(code, KeyModifiers::NONE)
        }

        fn press_with(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
            let quit = handle_key_event(
                &mut self.shell,
                &mut self.runtime,
                &self.tx,
                KeyEvent::new(code, modifiers),
            );
            self.pump();
            quit
        }

        fn type_text(&mut self, text: &str) {
            for ch in text.chars() {
                self.press(KeyCode::Char(ch));
            }
        }

        fn controller(&self) -> &TableController {
            self.shell
                .active_tab()
                .expect("active tab")
                .controller()
        }
    }

    fn purchases() -> TableController {
        TableController::new(purchase_schema()).with_clock(fixture_date)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn nav_keys_map_to_actions() {
        assert_eq!(
            nav_action_for_key(key(KeyCode::Char('n'))),
            Some(NavAction::NextPage)
        );
        assert_eq!(
            nav_action_for_key(key(KeyCode::PageUp)),
            Some(NavAction::PreviousPage)
        );
        assert_eq!(
            nav_action_for_key(key(KeyCode::Char(' '))),
            Some(NavAction::ToggleRow)
        );
        assert_eq!(
            nav_action_for_key(key(KeyCode::Enter)),
            Some(NavAction::Edit)
        );
        assert_eq!(
            nav_action_for_key(KeyEvent::new(KeyCode::Char('n'), KeyModifiers::CONTROL)),
            None
        );
        assert_eq!(nav_action_for_key(key(KeyCode::Char('~'))), None);
    }

    #[test]
    fn ctrl_q_quits() {
        let mut harness = Harness::new(vec![purchases()], 3);
        assert!(!harness.press(KeyCode::Char('q')));
        assert!(harness.press_with(KeyCode::Char('q'), KeyModifiers::CONTROL));
    }

    #[test]
    fn mount_loads_the_first_page_through_the_runtime() {
        let harness = Harness::new(vec![purchases()], 25);
        let controller = harness.controller();
        assert_eq!(controller.total(), 25);
        assert_eq!(controller.rendered_rows().len(), 10);
        assert_eq!(harness.shell.in_flight(), 0);
        assert!(!controller.is_loading());
    }

    #[test]
    fn page_keys_move_and_footer_tracks_bounds() {
        let mut harness = Harness::new(vec![purchases()], 25);
        let footer = pagination_text(harness.controller());
        assert!(footer.starts_with("page 1 of 3 | 25 rows | 10 per page"));
        assert!(!footer.contains("p prev"));
        assert!(footer.contains("n next"));

        harness.press(KeyCode::Char('n'));
        harness.press(KeyCode::Char('n'));
        assert_eq!(harness.controller().view().page, 3);
        let footer = pagination_text(harness.controller());
        assert!(footer.contains("p prev"));
        assert!(!footer.contains("n next"));

        harness.press(KeyCode::Char('n'));
        assert_eq!(harness.controller().view().page, 3);
        assert_eq!(
            harness.shell.status_text().map(|text| text.starts_with("already on the last page")),
            Some(true)
        );
    }

    #[test]
    fn go_to_page_prompt_dispatches_and_rejects_garbage() {
        let mut harness = Harness::new(vec![purchases()], 25);
        harness.press(KeyCode::Char(':'));
        assert_eq!(harness.shell.prompt(), Some(&Prompt::GoToPage(String::new())));
        harness.type_text("2");
        harness.press(KeyCode::Enter);
        assert!(harness.shell.prompt().is_none());
        assert_eq!(harness.controller().view().page, 2);

        harness.press(KeyCode::Char(':'));
        harness.type_text("two");
        harness.press(KeyCode::Enter);
        assert_eq!(harness.controller().view().page, 2);
        assert_eq!(
            harness.shell.status_text(),
            Some("\"two\" is not a page number")
        );
    }

    #[test]
    fn search_prompt_returns_to_the_first_page() {
        let mut harness = Harness::new(vec![purchases()], 25);
        harness.press(KeyCode::Char('n'));
        harness.press(KeyCode::Char('/'));
        harness.type_text("zz");
        harness.press(KeyCode::Backspace);
        harness.press(KeyCode::Enter);

        let view = harness.controller().view();
        assert_eq!(view.search, "z");
        assert_eq!(view.search_column.as_deref(), Some("material"));
        assert_eq!(view.page, 1);
    }

    #[test]
    fn esc_abandons_a_prompt_without_dispatching() {
        let mut harness = Harness::new(vec![purchases()], 25);
        harness.press(KeyCode::Char('/'));
        harness.type_text("cement");
        harness.press(KeyCode::Esc);
        assert!(harness.shell.prompt().is_none());
        assert_eq!(harness.controller().view().search, "");
    }

    #[test]
    fn add_dialog_collects_typed_input_and_saves() {
        let mut harness = Harness::new(vec![purchases()], 25);
        harness.press(KeyCode::Char('a'));
        assert_eq!(
            harness.controller().focused_dialog(),
            Some(DialogKind::Add)
        );

        harness.type_text("Sand");
        let inputs = harness.controller().form_inputs(DialogKind::Add);
        assert_eq!(inputs[0].field, "material");
        assert_eq!(inputs[0].value, FormValue::Text("Sand".to_owned()));

        let price = inputs
            .iter()
            .position(|input| input.field == "price")
            .expect("price input");
        for _ in 0..price {
            harness.press(KeyCode::Tab);
        }
        harness.press(KeyCode::Char('x'));
        assert_eq!(
            harness.shell.status_text(),
            Some("price accepts numbers only")
        );
        harness.type_text("12.5");

        harness.press(KeyCode::Enter);
        let controller = harness.controller();
        assert_eq!(controller.focused_dialog(), None);
        assert_eq!(controller.total(), 26);
        assert!(
            harness
                .shell
                .status_text()
                .is_some_and(|text| text.starts_with("Record added"))
        );
    }

    #[test]
    fn selected_rows_are_deleted_after_confirmation() {
        let mut harness = Harness::new(vec![purchases()], 25);
        harness.press(KeyCode::Char(' '));
        harness.press(KeyCode::Char('j'));
        harness.press(KeyCode::Char(' '));
        assert_eq!(harness.controller().view().selected.len(), 2);

        harness.press(KeyCode::Char('d'));
        assert_eq!(
            harness.controller().focused_dialog(),
            Some(DialogKind::Delete)
        );
        harness.press(KeyCode::Char('y'));

        let controller = harness.controller();
        assert_eq!(controller.focused_dialog(), None);
        assert_eq!(controller.total(), 23);
        assert!(controller.view().selected.is_empty());
    }

    #[test]
    fn delete_without_selection_only_reports() {
        let mut harness = Harness::new(vec![purchases()], 5);
        harness.press(KeyCode::Char('d'));
        assert_eq!(harness.controller().focused_dialog(), None);
        assert_eq!(harness.shell.status_text(), Some("nothing selected"));
    }

    #[test]
    fn open_edit_signal_switches_to_the_owning_tab() {
        let other = TableController::new(TableSchema::new("supplier"));
        let mut harness = Harness::new(vec![other, purchases()], 5);
        assert_eq!(harness.shell.active_index(), 0);

        let record = harness.shell.tabs()[1]
            .controller()
            .rendered_rows()
            .into_iter()
            .nth(2)
            .expect("third row");
        let (handle, commands) = shell_channel();
        handle
            .open_edit(PURCHASE_TABLE, record)
            .expect("receiver alive");
        handle
            .open_edit("invoice", tabula_app::Record::new())
            .expect("receiver alive");
        process_shell_commands(
            &mut harness.shell,
            &mut harness.runtime,
            &harness.tx,
            &commands,
        );

        assert_eq!(harness.shell.active_index(), 1);
        let edit = harness
            .controller()
            .edit_dialog()
            .expect("edit dialog open");
        assert_eq!(edit.key(), &RecordKey::from(3));
        assert_eq!(harness.shell.status_text(), Some("no tab shows invoice"));
    }

    #[test]
    fn sort_and_column_keys_follow_the_cursor() {
        let mut harness = Harness::new(vec![purchases()], 10);
        harness.press(KeyCode::Char('l'));
        harness.press(KeyCode::Char('s'));
        assert_eq!(
            harness.controller().view().sort,
            Some(SortSpec {
                field: "material".to_owned(),
                direction: SortDirection::Asc,
            })
        );

        harness.press(KeyCode::Char('c'));
        assert!(
            harness
                .controller()
                .view()
                .hidden_columns
                .contains("material")
        );
        harness.press(KeyCode::Char('C'));
        assert!(harness.controller().view().hidden_columns.is_empty());
    }

    #[test]
    fn page_size_cycles_through_allowed_sizes() {
        assert_eq!(next_page_size(10), 20);
        assert_eq!(next_page_size(50), 10);
        assert_eq!(next_page_size(7), 10);

        let mut harness = Harness::new(vec![purchases()], 25);
        harness.press(KeyCode::Char('z'));
        assert_eq!(harness.controller().view().page_size, 20);
        assert_eq!(harness.controller().total_pages(), 2);
    }

    #[test]
    fn dialog_keys_edit_the_focused_input() {
        let inputs = vec![
            BoundInput {
                field: "material".to_owned(),
                label: "Material".to_owned(),
                kind: InputKind::Text,
                value: FormValue::Text(String::new()),
            },
            BoundInput {
                field: "paid".to_owned(),
                label: "Paid".to_owned(),
                kind: InputKind::Toggle,
                value: FormValue::Bool(false),
            },
        ];
        assert_eq!(
            dialog_action_for_key(DialogKind::Add, &inputs, 0, key(KeyCode::Char('m'))),
            DialogAction::Command(TableCommand::EditField {
                field: "material".to_owned(),
                edit: FieldEdit::Push('m'),
            })
        );
        assert_eq!(
            dialog_action_for_key(DialogKind::Add, &inputs, 1, key(KeyCode::Char(' '))),
            DialogAction::Command(TableCommand::EditField {
                field: "paid".to_owned(),
                edit: FieldEdit::Toggle,
            })
        );
        assert_eq!(
            dialog_action_for_key(DialogKind::Add, &inputs, 1, key(KeyCode::Char('x'))),
            DialogAction::Ignore
        );
        assert_eq!(
            dialog_action_for_key(
                DialogKind::Edit,
                &inputs,
                0,
                KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL)
            ),
            DialogAction::Command(TableCommand::SaveDialog)
        );
        assert_eq!(
            dialog_action_for_key(DialogKind::Edit, &inputs, 0, key(KeyCode::BackTab)),
            DialogAction::MoveField(-1)
        );
        assert_eq!(
            dialog_action_for_key(DialogKind::Delete, &[], 0, key(KeyCode::Char('y'))),
            DialogAction::Command(TableCommand::ConfirmDelete)
        );
    }

    #[test]
    fn date_range_input_forms() {
        let today = date!(2026 - 05 - 14);
        assert_eq!(parse_date_range("  ", today), Ok(None));
        assert_eq!(
            parse_date_range("2026-03", today),
            Ok(Some(DateRange::new(date!(2026 - 03 - 01), date!(2026 - 03 - 31))))
        );
        assert_eq!(
            parse_date_range("2026-03-05", today),
            Ok(Some(DateRange::new(date!(2026 - 03 - 05), date!(2026 - 03 - 05))))
        );
        assert_eq!(
            parse_date_range("2026-03-10..2026-03-01", today),
            Ok(Some(DateRange::new(date!(2026 - 03 - 01), date!(2026 - 03 - 10))))
        );
        assert_eq!(
            parse_date_range("month", today),
            Ok(Some(DateRange::month_of(today)))
        );
        assert!(parse_date_range("last tuesday", today).is_err());
        assert!(parse_date_range("2026-03-01..soon", today).is_err());

        assert_eq!(
            prompt_command(&Prompt::DateRange(String::new()), today),
            Ok(TableCommand::ClearDateRange)
        );
    }

    #[test]
    fn cells_format_by_semantic_type() {
        assert_eq!(format_cell(&Value::Null, SemanticType::Number), "");
        assert_eq!(format_cell(&Value::Bool(true), SemanticType::Boolean), "yes");
        assert_eq!(format_cell(&Value::Number(120.0), SemanticType::Number), "120");
        assert_eq!(format_cell(&Value::Number(7.5), SemanticType::Number), "7.50");
        assert_eq!(
            format_cell(
                &Value::DateTime(datetime!(2026-03-04 15:30 UTC)),
                SemanticType::Date
            ),
            "2026-03-04"
        );
        assert_eq!(format_cell(&Value::text("Sand"), SemanticType::Text), "Sand");
    }

    #[test]
    fn long_labels_are_truncated_with_ellipsis() {
        assert_eq!(truncate_label("cement", 10), "cement");
        assert_eq!(truncate_label("reinforced concrete", 10), "reinforced…");
    }

    #[test]
    fn header_marks_the_sorted_column() {
        let price = ColumnDescriptor::new("price").titled("Price");
        let asc = SortSpec {
            field: "price".to_owned(),
            direction: SortDirection::Asc,
        };
        let desc = SortSpec {
            field: "price".to_owned(),
            direction: SortDirection::Desc,
        };
        let other = SortSpec {
            field: "material".to_owned(),
            direction: SortDirection::Asc,
        };
        assert_eq!(header_label(&price, Some(&asc)), "Price ↑");
        assert_eq!(header_label(&price, Some(&desc)), "Price ↓");
        assert_eq!(header_label(&price, Some(&other)), "Price");
        assert_eq!(header_label(&price, None), "Price");
    }

    #[test]
    fn worker_runtime_reports_outcomes_from_threads() {
        let (tx, rx) = mpsc::channel();
        let mut runtime = WorkerRuntime::new(Arc::new(MemoryGateway::purchases(12, 2)));
        let mut shell = Shell::new(vec![purchases()]);
        mount_all(&mut shell, &mut runtime, &tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        while shell.in_flight() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
            process_internal_events(&mut shell, &mut runtime, &tx, &rx);
        }

        assert_eq!(shell.in_flight(), 0);
        let controller = shell.active_tab().expect("tab").controller();
        assert_eq!(controller.total(), 12);
        assert_eq!(
            controller.types().get("paid"),
            Some(SemanticType::Boolean)
        );
    }
}
