//! Split allocation.
//!
//! Pure share arithmetic over integer minor units, with no persistence
//! involved: given a total and the participating members, produce one owed
//! share per member so that the shares re-sum to the total **exactly**.
//!
//! Two policies exist:
//!
//! - *equal*: everyone gets the rounded per-head share, and the whole
//!   rounding remainder lands on the first member. Deterministic: the same
//!   input always yields the same output.
//! - *custom*: members the user typed a value for are **locked**; the
//!   remaining amount is spread evenly over the unlocked members, and any
//!   leftover rounding difference lands on the last unlocked member.
//!
//! [`recompute_on_lock`] models the live editing interaction: each edit
//! locks one more member and refills the rest by the custom rule. Locked
//! values are never touched by a refill.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{EngineError, MoneyCents, ResultEngine};

/// Custom splits may drift from the total by at most 10 minor units before
/// the commit-time validation rejects them.
pub const SPLIT_SUM_TOLERANCE_MINOR: i64 = 10;

/// One member's owed share of an expense.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub user_id: String,
    pub owe_amount_minor: i64,
}

impl Share {
    pub fn new(user_id: &str, owe_amount_minor: i64) -> Self {
        Self {
            user_id: user_id.to_string(),
            owe_amount_minor,
        }
    }
}

fn require_members(members: &[String]) -> ResultEngine<()> {
    if members.is_empty() {
        return Err(EngineError::InvalidSplit(
            "an expense needs at least one participant".to_string(),
        ));
    }
    Ok(())
}

fn require_positive_total(total_minor: i64) -> ResultEngine<()> {
    if total_minor <= 0 {
        return Err(EngineError::InvalidAmount(
            "amount must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Splits `total_minor` equally among `members`, in member order.
///
/// Every member receives `round(total / n)`; the rounding remainder (at most
/// `n/2` minor units either way) is added to the first member so the shares
/// sum to `total_minor` exactly.
pub fn allocate_equal(total_minor: i64, members: &[String]) -> ResultEngine<Vec<Share>> {
    require_members(members)?;
    require_positive_total(total_minor)?;

    let n = members.len() as i64;
    let share = MoneyCents::new(total_minor).div_round(n).cents();

    let mut shares: Vec<Share> = members
        .iter()
        .map(|m| Share::new(m, share))
        .collect();

    let remainder = total_minor - n * share;
    if remainder != 0 {
        shares[0].owe_amount_minor += remainder;
    }

    Ok(shares)
}

/// Splits `total_minor` among `members` with the `manual` entries locked.
///
/// Members present in `manual` keep their typed value. The remaining amount
/// (`total - Σ locked`, possibly negative) is spread evenly over the
/// unlocked members, clamped at zero per head; whatever difference is left
/// after rounding or clamping is added to the **last** unlocked member.
///
/// With every member locked the entries are returned unchanged — whether
/// they sum to the total is [`validate_splits`]' call, not this function's.
pub fn allocate_custom(
    total_minor: i64,
    members: &[String],
    manual: &HashMap<String, i64>,
) -> ResultEngine<Vec<Share>> {
    require_members(members)?;
    require_positive_total(total_minor)?;

    let locked_sum: i64 = members
        .iter()
        .filter_map(|m| manual.get(m))
        .sum();
    let unlocked: Vec<&String> = members.iter().filter(|m| !manual.contains_key(*m)).collect();

    let fill = if unlocked.is_empty() {
        0
    } else {
        let remaining = total_minor - locked_sum;
        MoneyCents::new(remaining)
            .div_round(unlocked.len() as i64)
            .cents()
            .max(0)
    };

    let mut shares: Vec<Share> = members
        .iter()
        .map(|m| Share::new(m, manual.get(m).copied().unwrap_or(fill)))
        .collect();

    if let Some(last_unlocked) = unlocked.last() {
        let sum: i64 = shares.iter().map(|s| s.owe_amount_minor).sum();
        let diff = total_minor - sum;
        if diff != 0 {
            let share = shares
                .iter_mut()
                .rfind(|s| s.user_id == **last_unlocked)
                .ok_or_else(|| EngineError::InvalidSplit("unknown participant".to_string()))?;
            share.owe_amount_minor += diff;
        }
    }

    Ok(shares)
}

/// Recomputes the custom split after the user edits one member's field.
///
/// The edited member joins the locked set with `new_value_minor`; all other
/// locked entries keep their current value from `entries` and the unlocked
/// rest is refilled by the [`allocate_custom`] rule. Returns the refilled
/// shares together with the updated locked set.
///
/// Locking members one at a time in any order is convergent: after every
/// step the shares sum to the total, and no already-locked value changes.
pub fn recompute_on_lock(
    total_minor: i64,
    members: &[String],
    locked: &HashSet<String>,
    entries: &HashMap<String, i64>,
    edited_member: &str,
    new_value_minor: i64,
) -> ResultEngine<(Vec<Share>, HashSet<String>)> {
    if !members.iter().any(|m| m == edited_member) {
        return Err(EngineError::KeyNotFound(edited_member.to_string()));
    }

    let mut new_locked = locked.clone();
    new_locked.insert(edited_member.to_string());

    let mut manual: HashMap<String, i64> = HashMap::new();
    for member in members {
        if member == edited_member {
            manual.insert(member.clone(), new_value_minor);
        } else if new_locked.contains(member) {
            manual.insert(member.clone(), entries.get(member).copied().unwrap_or(0));
        }
    }

    let shares = allocate_custom(total_minor, members, &manual)?;
    Ok((shares, new_locked))
}

/// Commit-time check for custom splits: no share may be negative, and the
/// shares must sum to the total within [`SPLIT_SUM_TOLERANCE_MINOR`].
pub fn validate_splits(total_minor: i64, shares: &[Share]) -> ResultEngine<()> {
    require_members_shares(shares)?;
    for share in shares {
        if share.owe_amount_minor < 0 {
            return Err(EngineError::InvalidSplit(
                "split amounts cannot be negative".to_string(),
            ));
        }
    }

    let sum: i64 = shares.iter().map(|s| s.owe_amount_minor).sum();
    if (sum - total_minor).abs() > SPLIT_SUM_TOLERANCE_MINOR {
        return Err(EngineError::InvalidSplit(format!(
            "split amounts must equal the total ({}), current total: {}",
            MoneyCents::new(total_minor),
            MoneyCents::new(sum)
        )));
    }
    Ok(())
}

fn require_members_shares(shares: &[Share]) -> ResultEngine<()> {
    if shares.is_empty() {
        return Err(EngineError::InvalidSplit(
            "an expense needs at least one split".to_string(),
        ));
    }
    Ok(())
}
