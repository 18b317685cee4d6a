use std::collections::{HashMap, HashSet};

use sea_orm::{DatabaseTransaction, QueryFilter, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    ExpenseCategory, Member, MemberSpending, ResultEngine, SettlementStatus, balance,
    balance::{ExpenseRow, SplitRow}, expenses, group_members, settlements, splits, users,
    util::parse_uuid,
};

use super::{Engine, with_tx};

/// Aggregate balance view of a group, as rendered by a balances screen.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupBalances {
    pub roster: Vec<Member>,
    /// Net balance per roster member (positive = is owed money).
    pub net_balances_minor: HashMap<String, i64>,
    /// Total non-cancelled expense volume.
    pub total_expenses_minor: i64,
}

/// A group's full expense/split history in calculator form.
pub(super) struct GroupHistory {
    pub expenses: Vec<ExpenseRow>,
    pub splits: Vec<SplitRow>,
    pub settlement_ids: HashSet<Uuid>,
    pub current_members: Vec<String>,
}

impl GroupHistory {
    /// Rows restricted to plain expenses (the settlement-free debt reading
    /// used by the over-settlement dry run).
    pub fn expense_category_only(&self) -> (Vec<ExpenseRow>, Vec<SplitRow>) {
        let expenses: Vec<ExpenseRow> = self
            .expenses
            .iter()
            .filter(|e| !self.settlement_ids.contains(&e.id))
            .cloned()
            .collect();
        let ids: HashSet<Uuid> = expenses.iter().map(|e| e.id).collect();
        let splits = self
            .splits
            .iter()
            .filter(|s| ids.contains(&s.expense_id))
            .cloned()
            .collect();
        (expenses, splits)
    }

    /// Rows with one expense removed (used when editing a settlement, so it
    /// does not count against its own guard).
    pub fn without_expense(&self, expense_id: Uuid) -> (Vec<ExpenseRow>, Vec<SplitRow>) {
        let expenses = self
            .expenses
            .iter()
            .filter(|e| e.id != expense_id)
            .cloned()
            .collect();
        let splits = self
            .splits
            .iter()
            .filter(|s| s.expense_id != expense_id)
            .cloned()
            .collect();
        (expenses, splits)
    }
}

impl Engine {
    /// Loads a group's history as calculator rows, inside the caller's
    /// transaction so guards and the writes they gate see one snapshot.
    pub(super) async fn load_history(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
    ) -> ResultEngine<GroupHistory> {
        let expense_models = expenses::Entity::find()
            .filter(expenses::Column::GroupId.eq(group_id.to_string()))
            .all(db_tx)
            .await?;

        let mut settlement_ids: HashSet<Uuid> = HashSet::new();
        for model in &expense_models {
            if ExpenseCategory::try_from(model.category.as_str())? == ExpenseCategory::Settlement {
                settlement_ids.insert(parse_uuid(&model.id, "expense")?);
            }
        }

        // A settlement is invisible to balances once cancelled.
        let mut cancelled_ids: HashSet<Uuid> = HashSet::new();
        if !settlement_ids.is_empty() {
            let detail_models = settlements::Entity::find()
                .filter(
                    settlements::Column::ExpenseId
                        .is_in(settlement_ids.iter().map(ToString::to_string)),
                )
                .filter(
                    settlements::Column::SettlementStatus
                        .eq(SettlementStatus::Cancelled.as_str()),
                )
                .all(db_tx)
                .await?;
            for model in detail_models {
                cancelled_ids.insert(parse_uuid(&model.expense_id, "expense")?);
            }
        }

        let mut expense_rows = Vec::with_capacity(expense_models.len());
        for model in &expense_models {
            let id = parse_uuid(&model.id, "expense")?;
            expense_rows.push(ExpenseRow {
                id,
                paid_by: model.paid_by.clone(),
                amount_minor: model.amount_minor,
                cancelled: cancelled_ids.contains(&id),
            });
        }

        let split_models = if expense_models.is_empty() {
            Vec::new()
        } else {
            splits::Entity::find()
                .filter(
                    splits::Column::ExpenseId
                        .is_in(expense_models.iter().map(|e| e.id.clone())),
                )
                .all(db_tx)
                .await?
        };
        let mut split_rows = Vec::with_capacity(split_models.len());
        for model in split_models {
            split_rows.push(SplitRow {
                expense_id: parse_uuid(&model.expense_id, "expense")?,
                user_id: model.user_id,
                owe_amount_minor: model.owe_amount_minor,
            });
        }

        let member_rows = group_members::Entity::find()
            .filter(group_members::Column::GroupId.eq(group_id.to_string()))
            .all(db_tx)
            .await?;

        Ok(GroupHistory {
            expenses: expense_rows,
            splits: split_rows,
            settlement_ids,
            current_members: member_rows.into_iter().map(|m| m.user_id).collect(),
        })
    }

    /// Net debt `debtor` owes `creditor` from the full pairwise matrix,
    /// read inside the caller's transaction.
    pub(super) async fn net_debt_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        group_id: &str,
        debtor: &str,
        creditor: &str,
    ) -> ResultEngine<i64> {
        let history = self.load_history(db_tx, group_id).await?;
        Ok(balance::net_debt_between(
            &history.expenses,
            &history.splits,
            debtor,
            creditor,
        ))
    }

    async fn roster_for(
        &self,
        db_tx: &DatabaseTransaction,
        history: &GroupHistory,
    ) -> ResultEngine<Vec<Member>> {
        let mut involved: HashSet<String> = history.current_members.iter().cloned().collect();
        involved.extend(history.expenses.iter().map(|e| e.paid_by.clone()));
        involved.extend(history.splits.iter().map(|s| s.user_id.clone()));

        let mut display_names: HashMap<String, String> = HashMap::new();
        if !involved.is_empty() {
            let user_models = users::Entity::find()
                .filter(users::Column::Username.is_in(involved.iter().cloned()))
                .all(db_tx)
                .await?;
            for model in user_models {
                display_names.insert(model.username, model.display_name);
            }
        }

        Ok(balance::reconcile_roster(
            &history.current_members,
            &history.expenses,
            &history.splits,
            &display_names,
        ))
    }

    /// Net balance of one member: what they paid minus what they owe,
    /// settlements included unless cancelled. Positive = is owed money.
    pub async fn net_balance(
        &self,
        group_id: &str,
        member_id: &str,
        user_id: &str,
    ) -> ResultEngine<i64> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let history = self.load_history(&db_tx, group_id).await?;
            Ok(balance::net_balance(
                member_id,
                &history.expenses,
                &history.splits,
            ))
        })
    }

    /// Per-member spending shares for the balances screen, sorted by spent
    /// amount descending. Reporting only.
    pub async fn spending_shares(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<Vec<MemberSpending>> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let history = self.load_history(&db_tx, group_id).await?;
            let roster = self.roster_for(&db_tx, &history).await?;
            Ok(balance::spending_shares(
                &history.expenses,
                &history.splits,
                &roster,
            ))
        })
    }

    /// Pairwise net-debt matrix: `matrix[a][b]` is what `a` owes `b`, net
    /// of mutual expenses (negative meaning `b` owes `a`).
    pub async fn debt_matrix(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<HashMap<String, HashMap<String, i64>>> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let history = self.load_history(&db_tx, group_id).await?;
            Ok(balance::debt_matrix(&history.expenses, &history.splits))
        })
    }

    /// Everyone involved in the group's history — current members plus
    /// tagged ex-members, current first then alphabetical.
    pub async fn group_roster(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<Vec<Member>> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let history = self.load_history(&db_tx, group_id).await?;
            self.roster_for(&db_tx, &history).await
        })
    }

    /// Aggregate balances view: roster, per-member net balances, and total
    /// expense volume, computed from one snapshot.
    pub async fn group_balances(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<GroupBalances> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            let history = self.load_history(&db_tx, group_id).await?;
            let roster = self.roster_for(&db_tx, &history).await?;

            let net_balances_minor = roster
                .iter()
                .map(|member| {
                    (
                        member.user_id.clone(),
                        balance::net_balance(
                            &member.user_id,
                            &history.expenses,
                            &history.splits,
                        ),
                    )
                })
                .collect();
            let total_expenses_minor = history
                .expenses
                .iter()
                .filter(|e| !e.cancelled)
                .map(|e| e.amount_minor)
                .sum();

            Ok(GroupBalances {
                roster,
                net_balances_minor,
                total_expenses_minor,
            })
        })
    }
}
