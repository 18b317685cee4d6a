use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, TransactionTrait, prelude::*,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    EngineError, Expense, ExpenseCategory, PaymentIntent, ResultEngine, SettlementCmd,
    SettlementDetails, SettlementMethod, SettlementStatus, Share, UpdateSettlementCmd, balance,
    expenses, money, settlements, util::{model_currency, validate_text},
};

use super::{Engine, with_tx};

/// Result of the over-settlement dry run.
///
/// `actual_minor` is the debt between the pair from plain expenses only;
/// `pending_minor` sums every settlement between the pair that is pending or
/// confirmed. The caller renders a warning when `is_over` and asks the user
/// for an explicit override before committing the confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverSettlementCheck {
    pub is_over: bool,
    pub actual_minor: i64,
    pub pending_minor: i64,
}

/// A settlement expense with its lifecycle details and resolved receiver.
#[derive(Clone, Debug, PartialEq)]
pub struct SettlementView {
    pub expense: Expense,
    /// `None` for legacy records predating the details table.
    pub details: Option<SettlementDetails>,
    pub receiver: String,
}

impl SettlementView {
    /// Lifecycle state, with legacy no-details records reading as confirmed.
    pub fn effective_status(&self) -> SettlementStatus {
        self.details
            .as_ref()
            .map_or(SettlementStatus::Confirmed, |d| d.status)
    }
}

impl Engine {
    /// Records a settlement payment from `payer` to `receiver`.
    ///
    /// Guard: the amount may not exceed the payer's current net debt to the
    /// receiver (full pairwise matrix, cancelled settlements excluded) plus
    /// one minor unit of rounding slack — nobody settles more than they owe
    /// that counterparty.
    ///
    /// A manual settlement starts in `pending_confirmation`. A UPI
    /// settlement starts in `pending_utr`, requires the receiver to have a
    /// registered UPI handle, and additionally returns the payment intent
    /// URI for the caller to dispatch.
    pub async fn create_settlement(
        &self,
        cmd: SettlementCmd,
    ) -> ResultEngine<(Uuid, Option<PaymentIntent>)> {
        money::validate_amount_minor(cmd.amount_minor)?;
        if cmd.payer == cmd.receiver {
            return Err(EngineError::InvalidAmount(
                "payer and receiver must differ".to_string(),
            ));
        }

        with_tx!(self, |db_tx| {
            let group = self
                .require_group_member(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            self.require_member_of(&db_tx, &cmd.group_id, &cmd.payer)
                .await?;
            self.require_member_of(&db_tx, &cmd.group_id, &cmd.receiver)
                .await?;
            let currency = model_currency(&group.currency)?;
            let receiver_user = self.require_user_exists(&db_tx, &cmd.receiver).await?;

            let net_debt = self
                .net_debt_in_tx(&db_tx, &cmd.group_id, &cmd.payer, &cmd.receiver)
                .await?;
            if cmd.amount_minor > net_debt + 1 {
                return Err(EngineError::InvalidAmount(format!(
                    "cannot settle more than the outstanding debt of {}",
                    crate::MoneyCents::new(net_debt.max(0))
                )));
            }

            let intent = match cmd.method {
                SettlementMethod::Manual => None,
                SettlementMethod::Upi => {
                    let handle = receiver_user.upi_id.as_deref().ok_or_else(|| {
                        EngineError::MissingUpiHandle(format!(
                            "{} has no UPI handle registered",
                            cmd.receiver
                        ))
                    })?;
                    Some(PaymentIntent::upi(
                        handle,
                        &receiver_user.display_name,
                        cmd.amount_minor,
                        currency,
                        cmd.note.as_deref().unwrap_or("Settlement"),
                    ))
                }
            };

            let description = format!("Payment to {}", receiver_user.display_name);
            let expense = Expense::new(
                cmd.group_id.clone(),
                cmd.payer.clone(),
                cmd.amount_minor,
                currency,
                description,
                cmd.date,
                ExpenseCategory::Settlement,
                cmd.user_id.clone(),
            )?;
            let expense_id = expense.id;
            let shares = vec![Share::new(&cmd.receiver, cmd.amount_minor)];
            self.insert_expense_with_splits(&db_tx, &expense, &shares)
                .await?;

            let details = SettlementDetails::new(expense_id, cmd.method, &cmd.payer);
            settlements::ActiveModel::from(&details).insert(&db_tx).await?;

            debug!(
                group_id = %cmd.group_id,
                %expense_id,
                method = cmd.method.as_str(),
                "settlement recorded"
            );
            Ok((expense_id, intent))
        })
    }

    /// Attaches a UTR proof-of-payment reference (payer only, from
    /// `pending_utr`) and moves the settlement to `pending_confirmation`.
    pub async fn attach_utr(
        &self,
        group_id: &str,
        expense_id: Uuid,
        utr: &str,
        user_id: &str,
    ) -> ResultEngine<()> {
        settlements::validate_utr(utr)?;

        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let (expense_model, details) = self
                .require_settlement(&db_tx, group_id, expense_id)
                .await?;
            if expense_model.paid_by != user_id {
                return Err(EngineError::PermissionDenied(
                    "only the payer can attach a UTR".to_string(),
                ));
            }
            if details.status != SettlementStatus::PendingUtr {
                return Err(EngineError::InvalidState(format!(
                    "cannot attach a UTR in state {}",
                    details.status.as_str()
                )));
            }

            let active = settlements::ActiveModel {
                expense_id: ActiveValue::Set(expense_id.to_string()),
                utr_reference: ActiveValue::Set(Some(utr.trim().to_string())),
                settlement_status: ActiveValue::Set(
                    SettlementStatus::PendingConfirmation.as_str().to_string(),
                ),
                ..Default::default()
            };
            active.update(&db_tx).await?;

            debug!(%group_id, %expense_id, "UTR attached");
            Ok(())
        })
    }

    /// Dry-run over-settlement check for a settlement awaiting
    /// confirmation; commits nothing.
    ///
    /// The guard is advisory: it reads inside one DB transaction, but with
    /// no serializable isolation a concurrent writer can still slip a
    /// payment in between check and commit.
    pub async fn check_over_settlement(
        &self,
        group_id: &str,
        expense_id: Uuid,
        user_id: &str,
    ) -> ResultEngine<OverSettlementCheck> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let (expense_model, _details) = self
                .require_settlement(&db_tx, group_id, expense_id)
                .await?;
            let receiver = self.settlement_receiver(&db_tx, expense_id).await?;

            self.over_settlement_in_tx(&db_tx, group_id, &expense_model.paid_by, &receiver)
                .await
        })
    }

    /// Confirms a settlement (receiver only, from `pending_confirmation`).
    ///
    /// Runs the over-settlement dry run first; when the pair's pending and
    /// confirmed payments exceed the expense-only debt, the confirmation is
    /// refused with [`EngineError::OverSettlement`] unless `override_over`
    /// is set.
    pub async fn confirm_settlement(
        &self,
        group_id: &str,
        expense_id: Uuid,
        user_id: &str,
        override_over: bool,
        confirmed_at: DateTime<Utc>,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let (expense_model, details) = self
                .require_settlement(&db_tx, group_id, expense_id)
                .await?;
            let receiver = self.settlement_receiver(&db_tx, expense_id).await?;
            if receiver != user_id {
                return Err(EngineError::PermissionDenied(
                    "only the receiver can confirm a settlement".to_string(),
                ));
            }
            if details.status != SettlementStatus::PendingConfirmation {
                return Err(EngineError::InvalidState(format!(
                    "cannot confirm in state {}",
                    details.status.as_str()
                )));
            }

            let check = self
                .over_settlement_in_tx(&db_tx, group_id, &expense_model.paid_by, &receiver)
                .await?;
            if check.is_over && !override_over {
                return Err(EngineError::OverSettlement {
                    actual_minor: check.actual_minor,
                    pending_minor: check.pending_minor,
                });
            }

            let active = settlements::ActiveModel {
                expense_id: ActiveValue::Set(expense_id.to_string()),
                settlement_status: ActiveValue::Set(
                    SettlementStatus::Confirmed.as_str().to_string(),
                ),
                confirmed_by: ActiveValue::Set(Some(user_id.to_string())),
                confirmed_at: ActiveValue::Set(Some(confirmed_at)),
                ..Default::default()
            };
            active.update(&db_tx).await?;

            debug!(%group_id, %expense_id, overridden = check.is_over, "settlement confirmed");
            Ok(())
        })
    }

    /// Cancels a pending settlement (payer or receiver, non-empty reason).
    ///
    /// Flag-only: the status moves to `cancelled` and the reason is stored,
    /// while the underlying expense and split rows stay for audit. Balance
    /// computations exclude cancelled settlements, so the ledger effect is
    /// undone without rewriting history.
    pub async fn cancel_settlement(
        &self,
        group_id: &str,
        expense_id: Uuid,
        reason: &str,
        user_id: &str,
    ) -> ResultEngine<()> {
        let reason = validate_text(reason, "cancellation reason", 200)?;

        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let (expense_model, details) = self
                .require_settlement(&db_tx, group_id, expense_id)
                .await?;
            let receiver = self.settlement_receiver(&db_tx, expense_id).await?;
            if expense_model.paid_by != user_id && receiver != user_id {
                return Err(EngineError::PermissionDenied(
                    "only the payer or receiver can cancel a settlement".to_string(),
                ));
            }
            if !details.status.is_pending() {
                return Err(EngineError::InvalidState(format!(
                    "cannot cancel in state {}",
                    details.status.as_str()
                )));
            }

            let active = settlements::ActiveModel {
                expense_id: ActiveValue::Set(expense_id.to_string()),
                settlement_status: ActiveValue::Set(
                    SettlementStatus::Cancelled.as_str().to_string(),
                ),
                cancellation_reason: ActiveValue::Set(Some(reason.clone())),
                ..Default::default()
            };
            active.update(&db_tx).await?;

            debug!(%group_id, %expense_id, "settlement cancelled");
            Ok(())
        })
    }

    /// Edits a pending settlement: amount, receiver, description. The
    /// single split is recreated; the lifecycle state is preserved.
    ///
    /// Confirmed settlements are frozen (retroactive tampering with a
    /// completed payment) and cancelled ones stay cancelled.
    pub async fn update_settlement(&self, cmd: UpdateSettlementCmd) -> ResultEngine<()> {
        money::validate_amount_minor(cmd.amount_minor)?;

        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            let (expense_model, details) = self
                .require_settlement(&db_tx, &cmd.group_id, cmd.expense_id)
                .await?;
            let old_receiver = self.settlement_receiver(&db_tx, cmd.expense_id).await?;
            if expense_model.paid_by != cmd.user_id && old_receiver != cmd.user_id {
                return Err(EngineError::PermissionDenied(
                    "only the payer or receiver can edit a settlement".to_string(),
                ));
            }
            if !details.status.is_pending() {
                return Err(EngineError::InvalidState(format!(
                    "cannot edit a settlement in state {}",
                    details.status.as_str()
                )));
            }
            if expense_model.paid_by == cmd.receiver {
                return Err(EngineError::InvalidAmount(
                    "payer and receiver must differ".to_string(),
                ));
            }
            self.require_member_of(&db_tx, &cmd.group_id, &cmd.receiver)
                .await?;
            let receiver_user = self.require_user_exists(&db_tx, &cmd.receiver).await?;

            // The settlement being edited must not count against its own
            // guard, so the debt is read with it excluded.
            let history = self.load_history(&db_tx, &cmd.group_id).await?;
            let (other_expenses, other_splits) = history.without_expense(cmd.expense_id);
            let net_debt = balance::net_debt_between(
                &other_expenses,
                &other_splits,
                &expense_model.paid_by,
                &cmd.receiver,
            );
            if cmd.amount_minor > net_debt + 1 {
                return Err(EngineError::InvalidAmount(format!(
                    "cannot settle more than the outstanding debt of {}",
                    crate::MoneyCents::new(net_debt.max(0))
                )));
            }

            let description = match cmd.description.as_deref() {
                Some(text) => validate_text(text, "description", 100)?,
                None => format!("Payment to {}", receiver_user.display_name),
            };

            let expense_active = expenses::ActiveModel {
                id: ActiveValue::Set(cmd.expense_id.to_string()),
                amount_minor: ActiveValue::Set(cmd.amount_minor),
                description: ActiveValue::Set(description),
                ..Default::default()
            };
            expense_active.update(&db_tx).await?;

            let shares = vec![Share::new(&cmd.receiver, cmd.amount_minor)];
            self.replace_splits(&db_tx, cmd.expense_id, &shares).await?;

            Ok(())
        })
    }

    /// Reads a settlement with its details and resolved receiver.
    pub async fn settlement_view(
        &self,
        group_id: &str,
        expense_id: Uuid,
        user_id: &str,
    ) -> ResultEngine<SettlementView> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let expense_model = self
                .require_expense_in_group(&db_tx, group_id, expense_id)
                .await?;
            if ExpenseCategory::try_from(expense_model.category.as_str())?
                != ExpenseCategory::Settlement
            {
                return Err(EngineError::KeyNotFound("settlement not exists".to_string()));
            }
            let receiver = self.settlement_receiver(&db_tx, expense_id).await?;
            let details = settlements::Entity::find_by_id(expense_id.to_string())
                .one(&db_tx)
                .await?
                .map(SettlementDetails::try_from)
                .transpose()?;

            Ok(SettlementView {
                expense: Expense::try_from(expense_model)?,
                details,
                receiver,
            })
        })
    }

    /// Loads a settlement expense and its details row, rejecting plain
    /// expenses and legacy records without details (those are terminal).
    async fn require_settlement(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        expense_id: Uuid,
    ) -> ResultEngine<(expenses::Model, SettlementDetails)> {
        let expense_model = self
            .require_expense_in_group(db_tx, group_id, expense_id)
            .await?;
        if ExpenseCategory::try_from(expense_model.category.as_str())?
            != ExpenseCategory::Settlement
        {
            return Err(EngineError::KeyNotFound("settlement not exists".to_string()));
        }
        let details = settlements::Entity::find_by_id(expense_id.to_string())
            .one(db_tx)
            .await?
            .ok_or_else(|| {
                EngineError::InvalidState(
                    "legacy settlement without details is read-only".to_string(),
                )
            })?;
        Ok((expense_model, SettlementDetails::try_from(details)?))
    }

    /// Computes the over-settlement dry run for a payer/receiver pair
    /// inside the caller's transaction.
    async fn over_settlement_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        payer: &str,
        receiver: &str,
    ) -> ResultEngine<OverSettlementCheck> {
        let history = self.load_history(db_tx, group_id).await?;

        // Actual debt between the pair from plain expenses only: the
        // settlements themselves are counted on the pending side.
        let (expense_rows, split_rows) = history.expense_category_only();
        let actual_minor = balance::net_debt_between(&expense_rows, &split_rows, payer, receiver);

        // Every settlement between the pair that is pending or confirmed.
        let mut pending_minor = 0i64;
        if !history.settlement_ids.is_empty() {
            let detail_models = settlements::Entity::find()
                .filter(
                    settlements::Column::ExpenseId
                        .is_in(history.settlement_ids.iter().map(ToString::to_string)),
                )
                .filter(settlements::Column::SettlementStatus.is_in([
                    SettlementStatus::PendingUtr.as_str(),
                    SettlementStatus::PendingConfirmation.as_str(),
                    SettlementStatus::Confirmed.as_str(),
                ]))
                .all(db_tx)
                .await?;

            for model in detail_models {
                let id = crate::util::parse_uuid(&model.expense_id, "expense")?;
                let Some(expense) = history.expenses.iter().find(|e| e.id == id) else {
                    continue;
                };
                if expense.paid_by != payer {
                    continue;
                }
                let paid_to_receiver = history
                    .splits
                    .iter()
                    .any(|s| s.expense_id == id && s.user_id == receiver);
                if paid_to_receiver {
                    pending_minor += expense.amount_minor;
                }
            }
        }

        Ok(OverSettlementCheck {
            is_over: pending_minor > actual_minor + 1,
            actual_minor,
            pending_minor,
        })
    }
}
