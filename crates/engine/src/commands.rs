//! Command structs for engine operations.
//!
//! These types group parameters for write operations (create/update
//! expense, record/update settlement), keeping call sites readable and
//! avoiding long argument lists.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Share, SettlementMethod};

/// How an expense's cost is allocated across its participants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SplitSpec {
    /// Equal shares with the rounding remainder on the first participant.
    Equal,
    /// A completed share list (typically produced by the live allocator);
    /// re-validated against the total before commit.
    Custom(Vec<Share>),
}

/// Create an expense.
#[derive(Clone, Debug)]
pub struct ExpenseCmd {
    pub group_id: String,
    pub paid_by: String,
    pub amount_minor: i64,
    pub description: String,
    pub date: DateTime<Utc>,
    /// Participants of the split; defaults to the group's current members.
    pub participants: Option<Vec<String>>,
    pub split: SplitSpec,
    pub user_id: String,
}

impl ExpenseCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        paid_by: impl Into<String>,
        amount_minor: i64,
        description: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            paid_by: paid_by.into(),
            amount_minor,
            description: description.into(),
            date,
            participants: None,
            split: SplitSpec::Equal,
            user_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn participants(mut self, participants: Vec<String>) -> Self {
        self.participants = Some(participants);
        self
    }

    #[must_use]
    pub fn split(mut self, split: SplitSpec) -> Self {
        self.split = split;
        self
    }
}

/// Update an existing (non-settlement) expense.
///
/// The splits are always fully replaced, never merged: the command carries
/// the complete new allocation.
#[derive(Clone, Debug)]
pub struct UpdateExpenseCmd {
    pub group_id: String,
    pub expense_id: Uuid,
    pub paid_by: String,
    pub amount_minor: i64,
    pub description: String,
    pub date: Option<DateTime<Utc>>,
    pub participants: Option<Vec<String>>,
    pub split: SplitSpec,
    pub user_id: String,
}

impl UpdateExpenseCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        expense_id: Uuid,
        paid_by: impl Into<String>,
        amount_minor: i64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            expense_id,
            paid_by: paid_by.into(),
            amount_minor,
            description: description.into(),
            date: None,
            participants: None,
            split: SplitSpec::Equal,
            user_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    #[must_use]
    pub fn participants(mut self, participants: Vec<String>) -> Self {
        self.participants = Some(participants);
        self
    }

    #[must_use]
    pub fn split(mut self, split: SplitSpec) -> Self {
        self.split = split;
        self
    }
}

/// Record a settlement payment from `payer` to `receiver`.
#[derive(Clone, Debug)]
pub struct SettlementCmd {
    pub group_id: String,
    pub payer: String,
    pub receiver: String,
    pub amount_minor: i64,
    pub method: SettlementMethod,
    /// Optional note carried into the payment intent for UPI settlements.
    pub note: Option<String>,
    pub date: DateTime<Utc>,
    pub user_id: String,
}

impl SettlementCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        payer: impl Into<String>,
        receiver: impl Into<String>,
        amount_minor: i64,
        method: SettlementMethod,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            payer: payer.into(),
            receiver: receiver.into(),
            amount_minor,
            method,
            note: None,
            date,
            user_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Update a pending settlement (amount, receiver, description).
#[derive(Clone, Debug)]
pub struct UpdateSettlementCmd {
    pub group_id: String,
    pub expense_id: Uuid,
    pub receiver: String,
    pub amount_minor: i64,
    pub description: Option<String>,
    pub user_id: String,
}

impl UpdateSettlementCmd {
    #[must_use]
    pub fn new(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        expense_id: Uuid,
        receiver: impl Into<String>,
        amount_minor: i64,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            expense_id,
            receiver: receiver.into(),
            amount_minor,
            description: None,
            user_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
