//! Shared-expense ledger engine.
//!
//! Groups of users log expenses with per-member splits and settle their
//! debts through confirmable payment records. The crate is the core behind
//! any UI: split allocation, balance/debt computation, and the settlement
//! lifecycle, over an injected sea-orm record store.
//!
//! Every operation takes the acting `user_id` and the `group_id` explicitly;
//! the engine holds no session state and never reads the clock.

pub use allocation::Share;
pub use balance::{Member, MemberSpending};
pub use commands::{
    ExpenseCmd, SettlementCmd, SplitSpec, UpdateExpenseCmd, UpdateSettlementCmd,
};
pub use currency::Currency;
pub use error::EngineError;
pub use expenses::{Expense, ExpenseCategory};
pub use groups::Group;
pub use money::{MAX_AMOUNT_MINOR, MoneyCents};
pub use ops::{
    Engine, EngineBuilder, ExpenseListFilter, GroupBalances, OverSettlementCheck, SettlementView,
};
pub use settlements::{
    PaymentIntent, SettlementDetails, SettlementMethod, SettlementStatus, validate_utr,
};
pub use splits::Split;

pub mod allocation;
pub mod balance;
mod commands;
mod currency;
mod error;
mod expenses;
mod group_members;
mod groups;
mod money;
mod ops;
mod settlements;
mod splits;
mod users;
mod util;

pub type ResultEngine<T> = Result<T, EngineError>;
