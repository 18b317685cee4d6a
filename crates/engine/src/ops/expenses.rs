use sea_orm::{
    ActiveValue, DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    EngineError, Expense, ExpenseCategory, ExpenseCmd, ResultEngine, SettlementStatus, Share,
    Split, SplitSpec, UpdateExpenseCmd, allocation, expenses, group_members, money,
    settlements, splits, util::{model_currency, validate_text},
};

use super::{Engine, with_tx};

/// Filters for listing a group's expense history.
#[derive(Clone, Debug, Default)]
pub struct ExpenseListFilter {
    /// If present, only expenses of this category are returned.
    pub category: Option<ExpenseCategory>,
}

impl Engine {
    /// Creates an expense and its splits as one atomic unit.
    ///
    /// The split allocation happens engine-side for `SplitSpec::Equal`; a
    /// `SplitSpec::Custom` share list (typically produced by the live
    /// allocator) is re-validated against the total before commit.
    pub async fn create_expense(&self, cmd: ExpenseCmd) -> ResultEngine<Uuid> {
        let description = validate_text(&cmd.description, "description", 100)?;
        money::validate_amount_minor(cmd.amount_minor)?;

        with_tx!(self, |db_tx| {
            let group = self
                .require_group_member(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            self.require_member_of(&db_tx, &cmd.group_id, &cmd.paid_by)
                .await?;
            let currency = model_currency(&group.currency)?;

            let shares = self
                .resolve_shares(
                    &db_tx,
                    &cmd.group_id,
                    cmd.amount_minor,
                    cmd.participants.as_deref(),
                    &cmd.split,
                )
                .await?;

            let expense = Expense::new(
                cmd.group_id.clone(),
                cmd.paid_by.clone(),
                cmd.amount_minor,
                currency,
                description.clone(),
                cmd.date,
                ExpenseCategory::Expense,
                cmd.user_id.clone(),
            )?;
            let expense_id = expense.id;

            self.insert_expense_with_splits(&db_tx, &expense, &shares)
                .await?;

            debug!(group_id = %cmd.group_id, expense_id = %expense_id, "expense created");
            Ok(expense_id)
        })
    }

    /// Updates an expense, fully replacing its splits.
    ///
    /// Settlement-category expenses are rejected here — their edits go
    /// through the settlement operations so the payment lifecycle cannot be
    /// bypassed.
    pub async fn update_expense(&self, cmd: UpdateExpenseCmd) -> ResultEngine<()> {
        let description = validate_text(&cmd.description, "description", 100)?;
        money::validate_amount_minor(cmd.amount_minor)?;

        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, &cmd.group_id, &cmd.user_id)
                .await?;
            let expense_model = self
                .require_expense_in_group(&db_tx, &cmd.group_id, cmd.expense_id)
                .await?;
            if ExpenseCategory::try_from(expense_model.category.as_str())?
                == ExpenseCategory::Settlement
            {
                return Err(EngineError::InvalidState(
                    "settlements are edited through the settlement operations".to_string(),
                ));
            }
            self.require_member_of(&db_tx, &cmd.group_id, &cmd.paid_by)
                .await?;

            let shares = self
                .resolve_shares(
                    &db_tx,
                    &cmd.group_id,
                    cmd.amount_minor,
                    cmd.participants.as_deref(),
                    &cmd.split,
                )
                .await?;

            let expense_active = expenses::ActiveModel {
                id: ActiveValue::Set(cmd.expense_id.to_string()),
                paid_by: ActiveValue::Set(cmd.paid_by.clone()),
                amount_minor: ActiveValue::Set(cmd.amount_minor),
                description: ActiveValue::Set(description.clone()),
                date: ActiveValue::Set(cmd.date.unwrap_or(expense_model.date)),
                ..Default::default()
            };
            expense_active.update(&db_tx).await?;

            self.replace_splits(&db_tx, cmd.expense_id, &shares).await?;

            Ok(())
        })
    }

    /// Deletes an expense together with its splits and, for settlements,
    /// the details row — one unit, any state.
    ///
    /// Deleting a **confirmed** settlement rewrites completed payment
    /// history, so it requires `force`; legacy settlements (no details row)
    /// read as confirmed and get the same guard.
    pub async fn delete_expense(
        &self,
        group_id: &str,
        expense_id: Uuid,
        user_id: &str,
        force: bool,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let expense_model = self
                .require_expense_in_group(&db_tx, group_id, expense_id)
                .await?;

            if ExpenseCategory::try_from(expense_model.category.as_str())?
                == ExpenseCategory::Settlement
            {
                let details = settlements::Entity::find_by_id(expense_id.to_string())
                    .one(&db_tx)
                    .await?;
                let confirmed = match &details {
                    Some(model) => {
                        SettlementStatus::try_from(model.settlement_status.as_str())?
                            == SettlementStatus::Confirmed
                    }
                    // Legacy settlement rows read as confirmed.
                    None => true,
                };
                if confirmed && !force {
                    return Err(EngineError::InvalidState(
                        "deleting a confirmed settlement requires force".to_string(),
                    ));
                }
                if confirmed {
                    warn!(%expense_id, "force-deleting a confirmed settlement");
                }

                settlements::Entity::delete_by_id(expense_id.to_string())
                    .exec(&db_tx)
                    .await?;
            }

            splits::Entity::delete_many()
                .filter(splits::Column::ExpenseId.eq(expense_id.to_string()))
                .exec(&db_tx)
                .await?;
            expenses::Entity::delete_by_id(expense_id.to_string())
                .exec(&db_tx)
                .await?;

            debug!(%group_id, %expense_id, "expense deleted");
            Ok(())
        })
    }

    /// Lists a group's expenses, most recent first.
    pub async fn list_expenses(
        &self,
        group_id: &str,
        user_id: &str,
        filter: &ExpenseListFilter,
    ) -> ResultEngine<Vec<Expense>> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;

            let mut query = expenses::Entity::find()
                .filter(expenses::Column::GroupId.eq(group_id.to_string()))
                .order_by_desc(expenses::Column::Date);
            if let Some(category) = filter.category {
                query = query.filter(expenses::Column::Category.eq(category.as_str()));
            }

            let models = query.all(&db_tx).await?;
            models.into_iter().map(Expense::try_from).collect()
        })
    }

    /// Reads the split rows of one expense.
    pub async fn expense_splits(
        &self,
        group_id: &str,
        expense_id: Uuid,
        user_id: &str,
    ) -> ResultEngine<Vec<Split>> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            self.require_expense_in_group(&db_tx, group_id, expense_id)
                .await?;

            let models = splits::Entity::find()
                .filter(splits::Column::ExpenseId.eq(expense_id.to_string()))
                .all(&db_tx)
                .await?;
            models.into_iter().map(Split::try_from).collect()
        })
    }

    /// Resolves the final share list for an expense write.
    ///
    /// `Equal` allocates engine-side over the given participants (default:
    /// all current members, sorted); `Custom` takes the caller's completed
    /// share list. Both paths end in the commit-time validation.
    async fn resolve_shares(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        amount_minor: i64,
        participants: Option<&[String]>,
        split: &SplitSpec,
    ) -> ResultEngine<Vec<Share>> {
        let participants: Vec<String> = match participants {
            Some(list) => {
                for member in list {
                    self.require_member_of(db_tx, group_id, member).await?;
                }
                list.to_vec()
            }
            None => {
                let rows = group_members::Entity::find()
                    .filter(group_members::Column::GroupId.eq(group_id.to_string()))
                    .order_by_asc(group_members::Column::UserId)
                    .all(db_tx)
                    .await?;
                rows.into_iter().map(|m| m.user_id).collect()
            }
        };

        let shares = match split {
            SplitSpec::Equal => allocation::allocate_equal(amount_minor, &participants)?,
            SplitSpec::Custom(shares) => {
                for share in shares {
                    self.require_member_of(db_tx, group_id, &share.user_id)
                        .await?;
                }
                shares.clone()
            }
        };
        allocation::validate_splits(amount_minor, &shares)?;
        Ok(shares)
    }

    pub(super) async fn insert_expense_with_splits(
        &self,
        db_tx: &DatabaseTransaction,
        expense: &Expense,
        shares: &[Share],
    ) -> ResultEngine<()> {
        expenses::ActiveModel::from(expense).insert(db_tx).await?;
        for share in shares {
            let split = Split::new(expense.id, &share.user_id, share.owe_amount_minor);
            splits::ActiveModel::from(&split).insert(db_tx).await?;
        }
        Ok(())
    }

    /// Deletes an expense's split rows and inserts the replacement set.
    pub(super) async fn replace_splits(
        &self,
        db_tx: &DatabaseTransaction,
        expense_id: Uuid,
        shares: &[Share],
    ) -> ResultEngine<()> {
        splits::Entity::delete_many()
            .filter(splits::Column::ExpenseId.eq(expense_id.to_string()))
            .exec(db_tx)
            .await?;
        for share in shares {
            let split = Split::new(expense_id, &share.user_id, share.owe_amount_minor);
            splits::ActiveModel::from(&split).insert(db_tx).await?;
        }
        Ok(())
    }
}
