//! Producer call variants.
//!
//! Every operation of the producer contract is a variant of
//! [`ProducerCall`] or a [`TransactionalCall`]. Dynamic callers that only
//! know an operation name and positional arguments go through
//! [`classify`], which maps the fixed table of known call shapes onto those
//! variants.

use crate::backend::SendCallback;
use crate::message::{Delay, NormalizedMessage};
use crate::transaction::LocalTransactionExecutor;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

pub const SEND: &str = "send";
pub const SEND_ASYNC: &str = "send_async";
pub const SEND_ONEWAY: &str = "send_oneway";
pub const SEND_DELAYED_SECONDS: &str = "send_delayed_seconds";
pub const SEND_DELAYED_MILLIS: &str = "send_delayed_millis";
pub const SEND_PARSE: &str = "send_parse";
pub const SEND_GRAB: &str = "send_grab";
pub const SEND_IN_TRANSACTION: &str = "send_in_transaction";

/// How a normalized message is handed to the backend.
#[derive(Clone)]
pub enum Dispatch {
    /// Send and wait for the acknowledgement.
    Sync,
    /// Send in the background, report through the callback.
    Async(Option<Arc<dyn SendCallback>>),
    /// Enqueue and forget.
    Oneway,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Sync => f.write_str("Sync"),
            Dispatch::Async(cb) => write!(f, "Async(callback: {})", cb.is_some()),
            Dispatch::Oneway => f.write_str("Oneway"),
        }
    }
}

/// A plain producer operation with its arguments.
#[derive(Clone)]
pub enum ProducerCall {
    Send {
        content: String,
        tag: String,
        key: Option<String>,
        delay_minutes: i64,
    },
    SendAsync {
        content: String,
        tag: String,
        key: Option<String>,
        delay_minutes: i64,
        callback: Option<Arc<dyn SendCallback>>,
    },
    SendOneway {
        content: String,
        tag: String,
        key: Option<String>,
        delay_minutes: i64,
    },
    SendDelayedSeconds {
        content: String,
        tag: Option<String>,
        key: Option<String>,
        seconds: i64,
    },
    SendDelayedMillis {
        content: String,
        key: Option<String>,
        millis: i64,
    },
    SendParse {
        content: String,
        key: Option<String>,
        seconds: i64,
    },
    SendGrab {
        content: String,
        key: Option<String>,
        seconds: i64,
    },
}

impl ProducerCall {
    pub fn send(content: impl Into<String>, tag: impl Into<String>, delay_minutes: i64) -> Self {
        ProducerCall::Send {
            content: content.into(),
            tag: tag.into(),
            key: None,
            delay_minutes,
        }
    }

    pub fn send_async(content: impl Into<String>, tag: impl Into<String>, delay_minutes: i64) -> Self {
        ProducerCall::SendAsync {
            content: content.into(),
            tag: tag.into(),
            key: None,
            delay_minutes,
            callback: None,
        }
    }

    pub fn send_oneway(content: impl Into<String>, tag: impl Into<String>, delay_minutes: i64) -> Self {
        ProducerCall::SendOneway {
            content: content.into(),
            tag: tag.into(),
            key: None,
            delay_minutes,
        }
    }

    /// Sets the message key; variants without a tag keep theirs.
    pub fn with_key(mut self, new_key: impl Into<String>) -> Self {
        match &mut self {
            ProducerCall::Send { key, .. }
            | ProducerCall::SendAsync { key, .. }
            | ProducerCall::SendOneway { key, .. }
            | ProducerCall::SendDelayedSeconds { key, .. }
            | ProducerCall::SendDelayedMillis { key, .. }
            | ProducerCall::SendParse { key, .. }
            | ProducerCall::SendGrab { key, .. } => *key = Some(new_key.into()),
        }
        self
    }

    pub fn with_callback(mut self, cb: Arc<dyn SendCallback>) -> Self {
        if let ProducerCall::SendAsync { callback, .. } = &mut self {
            *callback = Some(cb);
        }
        self
    }

    pub fn operation(&self) -> &'static str {
        match self {
            ProducerCall::Send { .. } => SEND,
            ProducerCall::SendAsync { .. } => SEND_ASYNC,
            ProducerCall::SendOneway { .. } => SEND_ONEWAY,
            ProducerCall::SendDelayedSeconds { .. } => SEND_DELAYED_SECONDS,
            ProducerCall::SendDelayedMillis { .. } => SEND_DELAYED_MILLIS,
            ProducerCall::SendParse { .. } => SEND_PARSE,
            ProducerCall::SendGrab { .. } => SEND_GRAB,
        }
    }

    /// Builds the message for `topic` and the way it must be dispatched.
    pub fn into_message(self, topic: &str) -> (NormalizedMessage, Dispatch) {
        match self {
            ProducerCall::Send { content, tag, key, delay_minutes } => (
                NormalizedMessage::new(topic, content, Some(tag), key, Delay::Minutes(delay_minutes)),
                Dispatch::Sync,
            ),
            ProducerCall::SendAsync { content, tag, key, delay_minutes, callback } => (
                NormalizedMessage::new(topic, content, Some(tag), key, Delay::Minutes(delay_minutes)),
                Dispatch::Async(callback),
            ),
            ProducerCall::SendOneway { content, tag, key, delay_minutes } => (
                NormalizedMessage::new(topic, content, Some(tag), key, Delay::Minutes(delay_minutes)),
                Dispatch::Oneway,
            ),
            ProducerCall::SendDelayedSeconds { content, tag, key, seconds } => (
                NormalizedMessage::new(topic, content, tag, key, Delay::Seconds(seconds)),
                Dispatch::Sync,
            ),
            ProducerCall::SendDelayedMillis { content, key, millis } => (
                NormalizedMessage::new(topic, content, None, key, Delay::Millis(millis)),
                Dispatch::Sync,
            ),
            ProducerCall::SendParse { content, key, seconds }
            | ProducerCall::SendGrab { content, key, seconds } => (
                NormalizedMessage::new(topic, content, None, key, Delay::Seconds(seconds)),
                Dispatch::Sync,
            ),
        }
    }
}

impl fmt::Debug for ProducerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProducerCall({})", self.operation())
    }
}

/// A transactional send decided by a caller-supplied local transaction.
#[derive(Clone)]
pub struct TransactionalCall {
    pub content: String,
    pub tag: String,
    pub key: Option<String>,
    pub executor: Arc<dyn LocalTransactionExecutor>,
}

impl TransactionalCall {
    pub fn new(
        content: impl Into<String>,
        tag: impl Into<String>,
        executor: Arc<dyn LocalTransactionExecutor>,
    ) -> Self {
        Self {
            content: content.into(),
            tag: tag.into(),
            key: None,
            executor,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn into_message(self, topic: &str) -> (NormalizedMessage, Arc<dyn LocalTransactionExecutor>) {
        let message = NormalizedMessage::new(topic, self.content, Some(self.tag), self.key, Delay::NONE);
        (message, self.executor)
    }
}

impl fmt::Debug for TransactionalCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalCall")
            .field("tag", &self.tag)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// One positional argument of a dynamically described call.
#[derive(Clone)]
pub enum CallArg {
    Str(String),
    Int(i32),
    Long(i64),
    Null,
    Executor(Arc<dyn LocalTransactionExecutor>),
}

impl fmt::Debug for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallArg::Str(s) => write!(f, "{:?}", s),
            CallArg::Int(i) => write!(f, "{}", i),
            CallArg::Long(l) => write!(f, "{}L", l),
            CallArg::Null => f.write_str("null"),
            CallArg::Executor(_) => f.write_str("<executor>"),
        }
    }
}

impl From<&str> for CallArg {
    fn from(s: &str) -> Self {
        CallArg::Str(s.to_string())
    }
}

impl From<String> for CallArg {
    fn from(s: String) -> Self {
        CallArg::Str(s)
    }
}

impl From<i32> for CallArg {
    fn from(i: i32) -> Self {
        CallArg::Int(i)
    }
}

impl From<i64> for CallArg {
    fn from(l: i64) -> Self {
        CallArg::Long(l)
    }
}

/// An operation name with positional arguments.
#[derive(Debug, Clone)]
pub struct RawCall {
    pub operation: String,
    pub args: Vec<CallArg>,
}

impl RawCall {
    pub fn new(operation: impl Into<String>, args: Vec<CallArg>) -> Self {
        Self {
            operation: operation.into(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClassifiedCall {
    Producer(ProducerCall),
    Transactional(TransactionalCall),
}

fn text(arg: &CallArg) -> Option<String> {
    match arg {
        CallArg::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn optional_text(arg: &CallArg) -> Option<Option<String>> {
    match arg {
        CallArg::Str(s) => Some(Some(s.clone())),
        CallArg::Null => Some(None),
        _ => None,
    }
}

fn integer(arg: &CallArg) -> Option<i64> {
    match arg {
        CallArg::Int(i) => Some(i64::from(*i)),
        CallArg::Long(l) => Some(*l),
        _ => None,
    }
}

fn executor(arg: &CallArg) -> Option<Arc<dyn LocalTransactionExecutor>> {
    match arg {
        CallArg::Executor(e) => Some(e.clone()),
        _ => None,
    }
}

/// Matches `(operation, argc)` and the argument types against the known
/// call shapes.
pub fn classify(call: &RawCall) -> Result<ClassifiedCall> {
    let unrecognized = || Error::UnrecognizedCallShape {
        operation: call.operation.clone(),
        argc: call.args.len(),
    };
    let args = call.args.as_slice();

    let classified = match (call.operation.as_str(), args) {
        (SEND | SEND_ASYNC | SEND_ONEWAY, [content, tag, delay]) => {
            plain(&call.operation, text(content), text(tag), Some(None), integer(delay))
        }
        (SEND | SEND_ASYNC | SEND_ONEWAY, [content, tag, key, delay]) => {
            plain(&call.operation, text(content), text(tag), optional_text(key), integer(delay))
        }
        (SEND_DELAYED_SECONDS, [content, key, seconds]) => {
            match (text(content), optional_text(key), integer(seconds)) {
                (Some(content), Some(key), Some(seconds)) => Some(ProducerCall::SendDelayedSeconds {
                    content,
                    tag: None,
                    key,
                    seconds,
                }),
                _ => None,
            }
        }
        (SEND_DELAYED_SECONDS, [content, tag, key, seconds]) => {
            match (text(content), optional_text(tag), optional_text(key), integer(seconds)) {
                (Some(content), Some(tag), Some(key), Some(seconds)) => {
                    Some(ProducerCall::SendDelayedSeconds { content, tag, key, seconds })
                }
                _ => None,
            }
        }
        (SEND_DELAYED_MILLIS | SEND_PARSE | SEND_GRAB, [content, key, delay]) => {
            match (text(content), optional_text(key), integer(delay)) {
                (Some(content), Some(key), Some(delay)) => Some(match call.operation.as_str() {
                    SEND_DELAYED_MILLIS => ProducerCall::SendDelayedMillis { content, key, millis: delay },
                    SEND_PARSE => ProducerCall::SendParse { content, key, seconds: delay },
                    _ => ProducerCall::SendGrab { content, key, seconds: delay },
                }),
                _ => None,
            }
        }
        (SEND_IN_TRANSACTION, [content, tag, exec]) => {
            return match (text(content), text(tag), executor(exec)) {
                (Some(content), Some(tag), Some(executor)) => Ok(ClassifiedCall::Transactional(
                    TransactionalCall { content, tag, key: None, executor },
                )),
                _ => Err(unrecognized()),
            };
        }
        (SEND_IN_TRANSACTION, [content, tag, key, exec]) => {
            return match (text(content), text(tag), optional_text(key), executor(exec)) {
                (Some(content), Some(tag), Some(key), Some(executor)) => Ok(
                    ClassifiedCall::Transactional(TransactionalCall { content, tag, key, executor }),
                ),
                _ => Err(unrecognized()),
            };
        }
        _ => None,
    };

    classified.map(ClassifiedCall::Producer).ok_or_else(unrecognized)
}

fn plain(
    operation: &str,
    content: Option<String>,
    tag: Option<String>,
    key: Option<Option<String>>,
    delay: Option<i64>,
) -> Option<ProducerCall> {
    let (content, tag, key, delay_minutes) = (content?, tag?, key?, delay?);
    Some(match operation {
        SEND_ASYNC => ProducerCall::SendAsync {
            content,
            tag,
            key,
            delay_minutes,
            callback: None,
        },
        SEND_ONEWAY => ProducerCall::SendOneway { content, tag, key, delay_minutes },
        _ => ProducerCall::Send { content, tag, key, delay_minutes },
    })
}
