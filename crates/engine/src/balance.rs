//! Balance calculation.
//!
//! Pure accumulation over a group's expense/split history, kept free of
//! persistence so the arithmetic is testable row-by-row; `ops::balances`
//! feeds it with queried rows.
//!
//! Settlements participate like any expense (a pending payment already moves
//! the balance), with one exception: splits belonging to a **cancelled**
//! settlement are excluded everywhere, since a cancelled payment never
//! happened for balance purposes. The rows themselves stay in the store for
//! audit.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Below this magnitude a balance reads as "settled up" in UIs. The raw
/// value is always exact; this is a display threshold only.
pub const SETTLED_EPSILON_MINOR: i64 = 1;

/// Canonical member record consumed by every balance output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: String,
    pub display_name: String,
    pub is_current_member: bool,
}

/// Expense fields the calculator needs; `cancelled` marks a settlement whose
/// details row reached the cancelled state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpenseRow {
    pub id: Uuid,
    pub paid_by: String,
    pub amount_minor: i64,
    pub cancelled: bool,
}

/// Split fields the calculator needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitRow {
    pub expense_id: Uuid,
    pub user_id: String,
    pub owe_amount_minor: i64,
}

/// A member's share of the group's total spending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberSpending {
    pub member: Member,
    pub spent_minor: i64,
    pub percentage: f64,
}

fn active_expense_ids(expenses: &[ExpenseRow]) -> HashSet<Uuid> {
    expenses
        .iter()
        .filter(|e| !e.cancelled)
        .map(|e| e.id)
        .collect()
}

/// Net balance of `user_id`: what they paid minus what they owe, over every
/// non-cancelled expense. Positive means the member is owed money.
pub fn net_balance(user_id: &str, expenses: &[ExpenseRow], splits: &[SplitRow]) -> i64 {
    let active = active_expense_ids(expenses);

    let paid: i64 = expenses
        .iter()
        .filter(|e| !e.cancelled && e.paid_by == user_id)
        .map(|e| e.amount_minor)
        .sum();
    let owed: i64 = splits
        .iter()
        .filter(|s| s.user_id == user_id && active.contains(&s.expense_id))
        .map(|s| s.owe_amount_minor)
        .sum();

    paid - owed
}

/// `true` when a balance is small enough to display as settled.
pub fn is_settled(balance_minor: i64) -> bool {
    balance_minor.abs() < SETTLED_EPSILON_MINOR
}

/// Per-member spending shares, sorted by spent amount descending.
///
/// `spent` is the member's summed split shares; `percentage` relates it to
/// the group's total expense volume (0 when there are no expenses).
/// Reporting only — never used for correctness checks.
pub fn spending_shares(
    expenses: &[ExpenseRow],
    splits: &[SplitRow],
    roster: &[Member],
) -> Vec<MemberSpending> {
    let active = active_expense_ids(expenses);
    let total: i64 = expenses
        .iter()
        .filter(|e| !e.cancelled)
        .map(|e| e.amount_minor)
        .sum();

    let mut spent_by_user: HashMap<&str, i64> = HashMap::new();
    for split in splits {
        if active.contains(&split.expense_id) {
            *spent_by_user.entry(split.user_id.as_str()).or_default() += split.owe_amount_minor;
        }
    }

    let mut out: Vec<MemberSpending> = roster
        .iter()
        .map(|member| {
            let spent = spent_by_user
                .get(member.user_id.as_str())
                .copied()
                .unwrap_or(0);
            let percentage = if total > 0 {
                100.0 * spent as f64 / total as f64
            } else {
                0.0
            };
            MemberSpending {
                member: member.clone(),
                spent_minor: spent,
                percentage,
            }
        })
        .collect();
    out.sort_by(|a, b| b.spent_minor.cmp(&a.spent_minor));
    out
}

/// Pairwise net-debt matrix.
///
/// For every split `(expense, debtor, owe)` the expense's payer P is
/// resolved; self-payments are skipped; then `debt[debtor][P] += owe` and
/// `debt[P][debtor] -= owe`. For an ordered pair `(a, b)` the entry is the
/// net amount `a` owes `b` (negative meaning `b` owes `a`), so the matrix is
/// antisymmetric and carries no diagonal entries.
///
/// This matrix — not raw per-expense splits — is what gates how much may be
/// settled between two members.
pub fn debt_matrix(
    expenses: &[ExpenseRow],
    splits: &[SplitRow],
) -> HashMap<String, HashMap<String, i64>> {
    let payer_by_expense: HashMap<Uuid, &str> = expenses
        .iter()
        .filter(|e| !e.cancelled)
        .map(|e| (e.id, e.paid_by.as_str()))
        .collect();

    let mut matrix: HashMap<String, HashMap<String, i64>> = HashMap::new();
    for split in splits {
        let Some(payer) = payer_by_expense.get(&split.expense_id) else {
            continue;
        };
        if *payer == split.user_id {
            continue;
        }

        *matrix
            .entry(split.user_id.clone())
            .or_default()
            .entry((*payer).to_string())
            .or_default() += split.owe_amount_minor;
        *matrix
            .entry((*payer).to_string())
            .or_default()
            .entry(split.user_id.clone())
            .or_default() -= split.owe_amount_minor;
    }
    matrix
}

/// Net amount `debtor` owes `creditor` according to [`debt_matrix`].
pub fn net_debt_between(
    expenses: &[ExpenseRow],
    splits: &[SplitRow],
    debtor: &str,
    creditor: &str,
) -> i64 {
    debt_matrix(expenses, splits)
        .get(debtor)
        .and_then(|row| row.get(creditor))
        .copied()
        .unwrap_or(0)
}

/// Reconciles the roster of everyone involved in a group's history.
///
/// Unions three sets — current members, all-time payers, all-time split
/// participants — because a member may have left after incurring shared
/// debt. Ex-members are kept and tagged; the output sorts current members
/// first, then alphabetically by display name. Display names fall back to
/// the user id when no profile is known.
pub fn reconcile_roster(
    current_members: &[String],
    expenses: &[ExpenseRow],
    splits: &[SplitRow],
    display_names: &HashMap<String, String>,
) -> Vec<Member> {
    let current: HashSet<&str> = current_members.iter().map(String::as_str).collect();

    let mut ordered: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for user in current_members {
        if seen.insert(user.clone()) {
            ordered.push(user.clone());
        }
    }
    for expense in expenses {
        if seen.insert(expense.paid_by.clone()) {
            ordered.push(expense.paid_by.clone());
        }
    }
    for split in splits {
        if seen.insert(split.user_id.clone()) {
            ordered.push(split.user_id.clone());
        }
    }

    let mut roster: Vec<Member> = ordered
        .into_iter()
        .map(|user_id| {
            let display_name = display_names
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| user_id.clone());
            let is_current_member = current.contains(user_id.as_str());
            Member {
                user_id,
                display_name,
                is_current_member,
            }
        })
        .collect();

    roster.sort_by(|a, b| {
        b.is_current_member
            .cmp(&a.is_current_member)
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    roster
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(id: Uuid, paid_by: &str, amount_minor: i64) -> ExpenseRow {
        ExpenseRow {
            id,
            paid_by: paid_by.to_string(),
            amount_minor,
            cancelled: false,
        }
    }

    fn split(expense_id: Uuid, user_id: &str, owe_amount_minor: i64) -> SplitRow {
        SplitRow {
            expense_id,
            user_id: user_id.to_string(),
            owe_amount_minor,
        }
    }

    /// 100.00 paid by alice, split equally three ways (extra cent on alice).
    fn dinner() -> (Vec<ExpenseRow>, Vec<SplitRow>) {
        let id = Uuid::new_v4();
        (
            vec![expense(id, "alice", 10_000)],
            vec![
                split(id, "alice", 3334),
                split(id, "bob", 3333),
                split(id, "carol", 3333),
            ],
        )
    }

    #[test]
    fn net_balance_matches_paid_minus_owed() {
        let (expenses, splits) = dinner();
        assert_eq!(net_balance("alice", &expenses, &splits), 6666);
        assert_eq!(net_balance("bob", &expenses, &splits), -3333);
        assert_eq!(net_balance("carol", &expenses, &splits), -3333);
    }

    #[test]
    fn balances_conserve_to_zero() {
        let (mut expenses, mut splits) = dinner();
        let taxi = Uuid::new_v4();
        expenses.push(expense(taxi, "bob", 4500));
        splits.push(split(taxi, "alice", 1500));
        splits.push(split(taxi, "bob", 1500));
        splits.push(split(taxi, "carol", 1500));

        let total: i64 = ["alice", "bob", "carol"]
            .iter()
            .map(|u| net_balance(u, &expenses, &splits))
            .sum();
        assert_eq!(total, 0);
    }

    #[test]
    fn matrix_is_antisymmetric_with_no_diagonal() {
        let (mut expenses, mut splits) = dinner();
        let taxi = Uuid::new_v4();
        expenses.push(expense(taxi, "bob", 4500));
        splits.push(split(taxi, "alice", 1500));
        splits.push(split(taxi, "bob", 1500));
        splits.push(split(taxi, "carol", 1500));

        let matrix = debt_matrix(&expenses, &splits);
        for (a, row) in &matrix {
            assert!(!row.contains_key(a), "self-debt entry for {a}");
            for (b, amount) in row {
                assert_eq!(matrix[b][a], -amount, "asymmetry between {a} and {b}");
            }
        }

        // bob owed alice 33.33, alice owed bob 15.00 -> net 18.33.
        assert_eq!(matrix["bob"]["alice"], 1833);
        assert_eq!(matrix["alice"]["bob"], -1833);
    }

    #[test]
    fn cancelled_settlements_are_invisible_to_balances() {
        let (mut expenses, mut splits) = dinner();
        let payment = Uuid::new_v4();
        expenses.push(ExpenseRow {
            id: payment,
            paid_by: "bob".to_string(),
            amount_minor: 3333,
            cancelled: true,
        });
        splits.push(split(payment, "alice", 3333));

        assert_eq!(net_balance("bob", &expenses, &splits), -3333);
        assert_eq!(
            net_debt_between(&expenses, &splits, "bob", "alice"),
            3333
        );
    }

    #[test]
    fn spending_shares_relate_to_total() {
        let (expenses, splits) = dinner();
        let roster = vec![
            Member {
                user_id: "alice".to_string(),
                display_name: "Alice".to_string(),
                is_current_member: true,
            },
            Member {
                user_id: "bob".to_string(),
                display_name: "Bob".to_string(),
                is_current_member: true,
            },
        ];

        let shares = spending_shares(&expenses, &splits, &roster);
        assert_eq!(shares[0].member.user_id, "alice");
        assert_eq!(shares[0].spent_minor, 3334);
        assert!((shares[0].percentage - 33.34).abs() < 0.01);
        assert_eq!(shares[1].spent_minor, 3333);
    }

    #[test]
    fn spending_shares_zero_total_is_zero_percent() {
        let roster = vec![Member {
            user_id: "alice".to_string(),
            display_name: "Alice".to_string(),
            is_current_member: true,
        }];
        let shares = spending_shares(&[], &[], &roster);
        assert_eq!(shares[0].percentage, 0.0);
        assert_eq!(shares[0].spent_minor, 0);
    }

    #[test]
    fn roster_includes_and_tags_ex_members() {
        let (expenses, mut splits) = dinner();
        // dave left the group but still owes a share.
        splits.push(split(expenses[0].id, "dave", 0));

        let names = HashMap::from([
            ("alice".to_string(), "Alice".to_string()),
            ("bob".to_string(), "Bob".to_string()),
            ("carol".to_string(), "Carol".to_string()),
            ("dave".to_string(), "Dave".to_string()),
        ]);
        let roster = reconcile_roster(
            &["carol".to_string(), "alice".to_string(), "bob".to_string()],
            &expenses,
            &splits,
            &names,
        );

        let ids: Vec<&str> = roster.iter().map(|m| m.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol", "dave"]);
        assert!(roster[0].is_current_member);
        assert!(!roster[3].is_current_member);
    }

    #[test]
    fn roster_falls_back_to_user_id_for_unknown_profiles() {
        let roster = reconcile_roster(
            &["alice".to_string()],
            &[],
            &[],
            &HashMap::new(),
        );
        assert_eq!(roster[0].display_name, "alice");
    }

    #[test]
    fn settled_threshold_is_display_only() {
        assert!(is_settled(0));
        assert!(!is_settled(1));
        assert!(!is_settled(-1));
    }
}
