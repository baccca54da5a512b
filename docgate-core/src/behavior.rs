//! Behaviors: reusable command handlers registered on a gateway.

use bson::Bson;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

use crate::command::{CommandContext, CommandHandler, CommandName, CommandOutcome};

/// Closed set of behavior kinds a gateway can be queried for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorTag {
    Timestampable,
    Creatable,
    Modifiable,
    Sluggable,
    Lockable,
    Orderable,
    Identifiable,
}

impl fmt::Display for BehaviorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BehaviorTag::Timestampable => "timestampable",
            BehaviorTag::Creatable => "creatable",
            BehaviorTag::Modifiable => "modifiable",
            BehaviorTag::Sluggable => "sluggable",
            BehaviorTag::Lockable => "lockable",
            BehaviorTag::Orderable => "orderable",
            BehaviorTag::Identifiable => "identifiable",
        };
        f.write_str(name)
    }
}

/// A command handler identified by a [`BehaviorTag`].
pub trait Behavior: CommandHandler {
    fn tag(&self) -> BehaviorTag;
}

/// Stamps `created_on` on insert and `modified_on` on update.
///
/// An existing `created_on` value is kept.
#[derive(Debug, Clone)]
pub struct Timestampable {
    created_column: String,
    modified_column: String,
    clock: fn() -> DateTime<Utc>,
}

impl Default for Timestampable {
    fn default() -> Self {
        Self {
            created_column: "created_on".to_string(),
            modified_column: "modified_on".to_string(),
            clock: Utc::now,
        }
    }
}

impl Timestampable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(mut self, created: impl Into<String>, modified: impl Into<String>) -> Self {
        self.created_column = created.into();
        self.modified_column = modified.into();
        self
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> Bson {
        Bson::DateTime(bson::DateTime::from_chrono((self.clock)()))
    }
}

impl CommandHandler for Timestampable {
    fn execute(&self, name: CommandName, context: &mut CommandContext) -> CommandOutcome {
        let Some(row) = context.data.as_row_mut() else {
            return CommandOutcome::Continue;
        };

        match name {
            CommandName::BeforeInsert => {
                let now = self.now();
                if row.get(&self.created_column).is_none() {
                    row.set(&self.created_column, now.clone());
                }
                row.set(&self.modified_column, now);
            }
            CommandName::BeforeUpdate => {
                row.set(&self.modified_column, self.now());
            }
            _ => {}
        }

        CommandOutcome::Continue
    }

    fn priority(&self) -> i32 {
        1
    }
}

impl Behavior for Timestampable {
    fn tag(&self) -> BehaviorTag {
        BehaviorTag::Timestampable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{Operation, Payload},
        row::Row,
    };
    use bson::doc;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_stamps_on_insert_and_update() {
        let behavior = Timestampable::new().with_clock(fixed);
        let stamp = Bson::DateTime(bson::DateTime::from_chrono(fixed()));

        let mut context = CommandContext::new(Operation::Insert, "posts")
            .with_data(Payload::Row(Row::from_document(doc! { "title": "x" })));
        behavior.execute(CommandName::BeforeInsert, &mut context);

        let row = context.data.as_row().unwrap();
        assert_eq!(row.get("created_on"), Some(&stamp));
        assert_eq!(row.get("modified_on"), Some(&stamp));

        let mut context = CommandContext::new(Operation::Update, "posts")
            .with_data(Payload::Row(Row::from_document(doc! { "created_on": 1 })));
        behavior.execute(CommandName::BeforeUpdate, &mut context);

        let row = context.data.as_row().unwrap();
        assert_eq!(row.get("created_on"), Some(&Bson::Int32(1)));
        assert_eq!(row.get("modified_on"), Some(&stamp));
    }

    #[test]
    fn test_ignores_non_row_payloads() {
        let behavior = Timestampable::new();
        let mut context = CommandContext::new(Operation::Select, "posts");

        assert_eq!(behavior.execute(CommandName::BeforeInsert, &mut context), CommandOutcome::Continue);
        assert_eq!(behavior.tag().to_string(), "timestampable");
    }
}
