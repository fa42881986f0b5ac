// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fmt;

/// Represents errors that can occur while operating the store.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket or durability-file operations).
    Io(std::io::Error),

    /// The wire protocol was malformed beyond recovery; the connection is closed.
    Protocol(&'static str),

    /// A command was invoked with the wrong number of arguments.
    WrongArity(String),

    /// A command was invoked against a key holding an incompatible payload type.
    WrongType,

    /// A value could not be parsed as the type a command requires (integer, float, ...).
    NotAnInteger,

    /// Generic command-level failure, rendered verbatim as a RESP error to the client.
    Command(String),

    /// A background compaction was requested while one was already in progress.
    RewriteInProgress,

    /// The append-only log contains a record that could not be decoded.
    CorruptLog(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::WrongArity(cmd) => {
                write!(f, "ERR wrong number of arguments for '{cmd}'")
            }
            Self::WrongType => write!(
                f,
                "WRONGTYPE Operation against a key holding the wrong kind of value"
            ),
            Self::NotAnInteger => {
                write!(f, "ERR value is not an integer or out of range")
            }
            Self::Command(msg) => write!(f, "{msg}"),
            Self::RewriteInProgress => write!(f, "ERR BGREWRITEAOF already in progress"),
            Self::CorruptLog(msg) => write!(f, "corrupt append-only log: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Errors surfaced to a client as a RESP error reply carry a conventional
/// `PREFIX message` shape (`ERR ...`, `WRONGTYPE ...`, ...). This renders
/// any [`Error`] the dispatcher can produce into that wire form.
impl Error {
    #[must_use]
    pub fn to_resp_message(&self) -> String {
        self.to_string()
    }

    /// Whether this error should terminate the connection rather than
    /// merely produce an error reply to the client.
    #[must_use]
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
