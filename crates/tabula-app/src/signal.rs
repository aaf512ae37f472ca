// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::sync::mpsc::{self, Receiver, SendError, Sender};

use crate::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

impl NotificationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub detail: String,
}

impl Notification {
    pub fn success(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// Commands other parts of the application send to the table shell.
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    OpenEdit { collection: String, record: Record },
}

#[derive(Debug, Clone)]
pub struct ShellHandle {
    sender: Sender<ShellCommand>,
}

impl ShellHandle {
    pub fn open_edit(
        &self,
        collection: impl Into<String>,
        record: Record,
    ) -> Result<(), SendError<ShellCommand>> {
        self.sender.send(ShellCommand::OpenEdit {
            collection: collection.into(),
            record,
        })
    }
}

pub fn shell_channel() -> (ShellHandle, Receiver<ShellCommand>) {
    let (sender, receiver) = mpsc::channel();
    (ShellHandle { sender }, receiver)
}
