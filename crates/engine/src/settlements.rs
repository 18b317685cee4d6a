//! Settlement details.
//!
//! A settlement is a settlement-category [`Expense`](crate::Expense) plus a
//! 1:1 `SettlementDetails` row that carries the payment lifecycle:
//!
//! ```text
//! pending_utr ──> pending_confirmation ──> confirmed
//!      │                   │
//!      └───────────────────┴──> cancelled
//! ```
//!
//! Manual settlements start in `pending_confirmation`; UPI settlements start
//! in `pending_utr` and move forward when the payer attaches a UTR
//! reference. `confirmed` and `cancelled` are terminal. A settlement expense
//! with *no* details row is a legacy record: it reads as confirmed and
//! accepts no transitions.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, EngineError, MoneyCents, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMethod {
    Manual,
    Upi,
}

impl SettlementMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Upi => "upi",
        }
    }

    /// Initial lifecycle state for a settlement recorded with this method.
    pub fn initial_status(self) -> SettlementStatus {
        match self {
            Self::Manual => SettlementStatus::PendingConfirmation,
            Self::Upi => SettlementStatus::PendingUtr,
        }
    }
}

impl TryFrom<&str> for SettlementMethod {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "manual" => Ok(Self::Manual),
            "upi" => Ok(Self::Upi),
            other => Err(EngineError::InvalidId(format!(
                "invalid payment method: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    PendingUtr,
    PendingConfirmation,
    Confirmed,
    Cancelled,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingUtr => "pending_utr",
            Self::PendingConfirmation => "pending_confirmation",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Cancelled)
    }

    /// States from which a settlement may still be cancelled.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingUtr | Self::PendingConfirmation)
    }
}

impl TryFrom<&str> for SettlementStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending_utr" => Ok(Self::PendingUtr),
            "pending_confirmation" => Ok(Self::PendingConfirmation),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(EngineError::InvalidId(format!(
                "invalid settlement status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDetails {
    pub expense_id: Uuid,
    pub method: SettlementMethod,
    pub status: SettlementStatus,
    pub utr_reference: Option<String>,
    pub initiated_by: String,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl SettlementDetails {
    pub fn new(expense_id: Uuid, method: SettlementMethod, initiated_by: &str) -> Self {
        Self {
            expense_id,
            method,
            status: method.initial_status(),
            utr_reference: None,
            initiated_by: initiated_by.to_string(),
            confirmed_by: None,
            confirmed_at: None,
            cancellation_reason: None,
        }
    }
}

/// Validates a UTR (Unique Transaction Reference) proof-of-payment code:
/// 12 to 16 ASCII digits, nothing else.
pub fn validate_utr(utr: &str) -> ResultEngine<()> {
    let trimmed = utr.trim();
    if !(12..=16).contains(&trimmed.len()) {
        return Err(EngineError::InvalidUtr(
            "UTR must be 12 to 16 digits".to_string(),
        ));
    }
    if !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::InvalidUtr(
            "UTR must contain only digits".to_string(),
        ));
    }
    Ok(())
}

/// External payment-intent reference for a UPI settlement.
///
/// The engine only composes the URI; launching the payment app with it is
/// the caller's side effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub uri: String,
}

impl PaymentIntent {
    /// Builds a `upi://pay` intent from the receiver's handle and the
    /// settlement amount/note.
    pub fn upi(
        handle: &str,
        payee_name: &str,
        amount_minor: i64,
        currency: Currency,
        note: &str,
    ) -> Self {
        let amount = MoneyCents::new(amount_minor);
        let pn = urlencode(payee_name);
        let tn = urlencode(note);
        Self {
            uri: format!(
                "upi://pay?pa={handle}&pn={pn}&am={amount}&cu={}&tn={tn}",
                currency.code()
            ),
        }
    }
}

/// Percent-encodes everything outside the URI unreserved set.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "settlement_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub expense_id: String,
    pub payment_method: String,
    pub settlement_status: String,
    pub utr_reference: Option<String>,
    pub initiated_by: String,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<DateTimeUtc>,
    pub cancellation_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::expenses::Entity",
        from = "Column::ExpenseId",
        to = "super::expenses::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Expenses,
}

impl Related<super::expenses::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Expenses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&SettlementDetails> for ActiveModel {
    fn from(details: &SettlementDetails) -> Self {
        Self {
            expense_id: ActiveValue::Set(details.expense_id.to_string()),
            payment_method: ActiveValue::Set(details.method.as_str().to_string()),
            settlement_status: ActiveValue::Set(details.status.as_str().to_string()),
            utr_reference: ActiveValue::Set(details.utr_reference.clone()),
            initiated_by: ActiveValue::Set(details.initiated_by.clone()),
            confirmed_by: ActiveValue::Set(details.confirmed_by.clone()),
            confirmed_at: ActiveValue::Set(details.confirmed_at),
            cancellation_reason: ActiveValue::Set(details.cancellation_reason.clone()),
        }
    }
}

impl TryFrom<Model> for SettlementDetails {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            expense_id: Uuid::parse_str(&model.expense_id)
                .map_err(|_| EngineError::KeyNotFound("expense not exists".to_string()))?,
            method: SettlementMethod::try_from(model.payment_method.as_str())?,
            status: SettlementStatus::try_from(model.settlement_status.as_str())?,
            utr_reference: model.utr_reference,
            initiated_by: model.initiated_by,
            confirmed_by: model.confirmed_by,
            confirmed_at: model.confirmed_at,
            cancellation_reason: model.cancellation_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utr_length_bounds() {
        assert!(validate_utr("12345678901").is_err());
        assert!(validate_utr("123456789012").is_ok());
        assert!(validate_utr("1234567890123456").is_ok());
        assert!(validate_utr("12345678901234567").is_err());
    }

    #[test]
    fn utr_rejects_non_digits() {
        assert!(validate_utr("12a456789012").is_err());
        assert!(validate_utr("12345678 9012").is_err());
    }

    #[test]
    fn method_sets_initial_status() {
        assert_eq!(
            SettlementMethod::Manual.initial_status(),
            SettlementStatus::PendingConfirmation
        );
        assert_eq!(
            SettlementMethod::Upi.initial_status(),
            SettlementStatus::PendingUtr
        );
    }

    #[test]
    fn upi_intent_encodes_note() {
        let intent = PaymentIntent::upi("rahul@upi", "Rahul S", 4000, Currency::Inr, "Trip dues");
        assert_eq!(
            intent.uri,
            "upi://pay?pa=rahul@upi&pn=Rahul%20S&am=40.00&cu=INR&tn=Trip%20dues"
        );
    }
}
