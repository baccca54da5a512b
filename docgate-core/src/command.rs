//! Named hook points around gateway operations.
//!
//! Every CRUD operation of a [`DocumentGateway`](crate::gateway::DocumentGateway)
//! runs its `before.*` hook, the storage call and its `after.*` hook. A handler
//! returning [`CommandOutcome::Stop`] from a `before.*` hook aborts the
//! operation: the storage call and the `after.*` hook are skipped and the
//! operation returns whatever the context holds.
//!
//! ```ignore
//! struct Reject;
//!
//! impl CommandHandler for Reject {
//!     fn execute(&self, name: CommandName, _context: &mut CommandContext) -> CommandOutcome {
//!         if name == CommandName::BeforeInsert { CommandOutcome::Stop } else { CommandOutcome::Continue }
//!     }
//! }
//!
//! gateway.enqueue(Arc::new(Reject));
//! ```

use bson::Document;
use std::{fmt, sync::Arc};
use tracing::debug;

use crate::{backend::FetchMode, query::DocumentQuery, row::Row, rowset::Rowset};

/// Priority assigned to handlers enqueued without one.
pub const DEFAULT_PRIORITY: i32 = 3;

/// Kind of operation a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

/// Hook points run by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    BeforeFind,
    AfterFind,
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl CommandName {
    /// Returns the dotted name of the hook point, e.g. `before.find`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandName::BeforeFind => "before.find",
            CommandName::AfterFind => "after.find",
            CommandName::BeforeInsert => "before.insert",
            CommandName::AfterInsert => "after.insert",
            CommandName::BeforeUpdate => "before.update",
            CommandName::AfterUpdate => "after.update",
            CommandName::BeforeDelete => "before.delete",
            CommandName::AfterDelete => "after.delete",
        }
    }

    /// Returns `true` for the `before.*` hook points.
    pub fn is_before(&self) -> bool {
        matches!(
            self,
            CommandName::BeforeFind | CommandName::BeforeInsert | CommandName::BeforeUpdate | CommandName::BeforeDelete
        )
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandOutcome {
    #[default]
    Continue,
    Stop,
}

/// Data carried by a command context.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Row(Row),
    Rowset(Rowset),
    Document(Option<Document>),
    Documents(Vec<Document>),
}

impl Payload {
    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Payload::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn as_row_mut(&mut self) -> Option<&mut Row> {
        match self {
            Payload::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            Payload::Row(row) => Some(row),
            _ => None,
        }
    }

    pub fn into_rowset(self) -> Option<Rowset> {
        match self {
            Payload::Rowset(rowset) => Some(rowset),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Payload::Document(document) => document,
            Payload::Row(row) => Some(row.to_document()),
            _ => None,
        }
    }

    pub fn into_documents(self) -> Vec<Document> {
        match self {
            Payload::Documents(documents) => documents,
            Payload::Document(document) => document.into_iter().collect(),
            Payload::Rowset(rowset) => rowset.to_documents(),
            Payload::Row(row) => vec![row.to_document()],
            Payload::Empty => Vec::new(),
        }
    }
}

/// Mutable record shared by the hooks and the storage call of one operation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub operation: Operation,
    pub query: Option<DocumentQuery>,
    pub data: Payload,
    /// Name of the target collection.
    pub collection: String,
    /// Fetch mode of a select, `None` for mutations.
    pub mode: Option<FetchMode>,
    /// Number of records affected by a mutation.
    pub affected: Option<u64>,
}

impl CommandContext {
    pub fn new(operation: Operation, collection: impl Into<String>) -> Self {
        Self {
            operation,
            query: None,
            data: Payload::Empty,
            collection: collection.into(),
            mode: None,
            affected: None,
        }
    }

    pub fn with_query(mut self, query: Option<DocumentQuery>) -> Self {
        self.query = query;
        self
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// A handler invoked at the gateway's hook points.
///
/// Handlers run synchronously and may freely modify the context: replace the
/// query, rewrite the payload or preset the affected count of an operation
/// they are about to abort.
pub trait CommandHandler: Send + Sync {
    /// Runs the handler for the hook point `name`.
    fn execute(&self, name: CommandName, context: &mut CommandContext) -> CommandOutcome;

    /// Position of the handler in the chain; lower values run first.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }
}

struct Entry {
    priority: i32,
    handler: Arc<dyn CommandHandler>,
}

/// Ordered list of handlers.
///
/// Handlers run by ascending priority; handlers of equal priority run in
/// registration order.
#[derive(Default)]
pub struct CommandChain {
    entries: Vec<Entry>,
}

impl fmt::Debug for CommandChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChain").field("handlers", &self.entries.len()).finish()
    }
}

impl CommandChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler at its own priority.
    pub fn enqueue(&mut self, handler: Arc<dyn CommandHandler>) {
        let priority = handler.priority();
        self.enqueue_with_priority(handler, priority);
    }

    /// Adds a handler at an explicit priority.
    pub fn enqueue_with_priority(&mut self, handler: Arc<dyn CommandHandler>, priority: i32) {
        let position = self.entries.partition_point(|entry| entry.priority <= priority);
        self.entries.insert(position, Entry { priority, handler });
    }

    /// Removes a previously enqueued handler. Returns `false` if it was not
    /// part of the chain.
    pub fn dequeue(&mut self, handler: &Arc<dyn CommandHandler>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| !Arc::ptr_eq(&entry.handler, handler));
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the handlers in execution order.
    pub fn handlers(&self) -> Vec<Arc<dyn CommandHandler>> {
        self.entries.iter().map(|entry| entry.handler.clone()).collect()
    }

    /// Runs every handler for `name`. Returns `false` as soon as a handler
    /// stops the chain; the remaining handlers are skipped.
    pub fn run(&self, name: CommandName, context: &mut CommandContext) -> bool {
        run_handlers(&self.handlers(), name, context)
    }
}

/// Runs `handlers` in order, see [`CommandChain::run`].
pub fn run_handlers(handlers: &[Arc<dyn CommandHandler>], name: CommandName, context: &mut CommandContext) -> bool {
    for (index, handler) in handlers.iter().enumerate() {
        if handler.execute(name, context) == CommandOutcome::Stop {
            debug!(command = %name, handler = index, collection = %context.collection, "command chain stopped");
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct Recorder {
        label: &'static str,
        priority: i32,
        stop_on: Option<CommandName>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl CommandHandler for Recorder {
        fn execute(&self, name: CommandName, _context: &mut CommandContext) -> CommandOutcome {
            self.log.lock().push(format!("{}:{}", self.label, name));

            if self.stop_on == Some(name) { CommandOutcome::Stop } else { CommandOutcome::Continue }
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn recorder(
        label: &'static str,
        priority: i32,
        stop_on: Option<CommandName>,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn CommandHandler> {
        Arc::new(Recorder { label, priority, stop_on, log: log.clone() })
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CommandChain::new();
        chain.enqueue(recorder("a", DEFAULT_PRIORITY, None, &log));
        chain.enqueue(recorder("b", DEFAULT_PRIORITY, None, &log));

        let mut context = CommandContext::new(Operation::Select, "users");
        assert!(chain.run(CommandName::BeforeFind, &mut context));

        assert_eq!(*log.lock(), vec!["a:before.find", "b:before.find"]);
    }

    #[test]
    fn test_priority_orders_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CommandChain::new();
        chain.enqueue(recorder("late", 5, None, &log));
        chain.enqueue(recorder("early", 1, None, &log));
        chain.enqueue_with_priority(recorder("middle", 5, None, &log), 2);

        let mut context = CommandContext::new(Operation::Insert, "users");
        chain.run(CommandName::AfterInsert, &mut context);

        assert_eq!(
            *log.lock(),
            vec!["early:after.insert", "middle:after.insert", "late:after.insert"]
        );
    }

    #[test]
    fn test_stop_skips_remaining_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CommandChain::new();
        chain.enqueue(recorder("a", DEFAULT_PRIORITY, Some(CommandName::BeforeInsert), &log));
        chain.enqueue(recorder("b", DEFAULT_PRIORITY, None, &log));

        let mut context = CommandContext::new(Operation::Insert, "users");
        assert!(!chain.run(CommandName::BeforeInsert, &mut context));
        assert!(chain.run(CommandName::BeforeUpdate, &mut context));

        assert_eq!(
            *log.lock(),
            vec!["a:before.insert", "a:before.update", "b:before.update"]
        );
    }

    #[test]
    fn test_dequeue() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder("a", DEFAULT_PRIORITY, None, &log);
        let mut chain = CommandChain::new();
        chain.enqueue(handler.clone());

        assert!(chain.dequeue(&handler));
        assert!(!chain.dequeue(&handler));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_command_names() {
        assert_eq!(CommandName::BeforeDelete.to_string(), "before.delete");
        assert!(CommandName::BeforeFind.is_before());
        assert!(!CommandName::AfterUpdate.is_before());
    }
}
