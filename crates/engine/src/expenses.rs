//! Expense primitives.
//!
//! An `Expense` is an atomic event in a group's ledger. A settlement is an
//! expense too (`category = settlement`): the payment from one member to
//! another is recorded as an expense paid by the payer with a single split
//! owed by the receiver, so pending and confirmed payments move balances
//! through the same arithmetic as ordinary expenses.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Currency, EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseCategory {
    Expense,
    Settlement,
}

impl ExpenseCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Settlement => "settlement",
        }
    }
}

impl TryFrom<&str> for ExpenseCategory {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "expense" => Ok(Self::Expense),
            "settlement" => Ok(Self::Settlement),
            other => Err(EngineError::InvalidId(format!(
                "invalid expense category: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub group_id: String,
    pub paid_by: String,
    pub amount_minor: i64,
    pub currency: Currency,
    pub description: String,
    pub date: DateTime<Utc>,
    pub category: ExpenseCategory,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    pub fn new(
        group_id: String,
        paid_by: String,
        amount_minor: i64,
        currency: Currency,
        description: String,
        date: DateTime<Utc>,
        category: ExpenseCategory,
        created_by: String,
    ) -> ResultEngine<Self> {
        if amount_minor <= 0 {
            return Err(EngineError::InvalidAmount(
                "amount_minor must be > 0".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            group_id,
            paid_by,
            amount_minor,
            currency,
            description,
            date,
            category,
            created_by,
            created_at: date,
        })
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub group_id: String,
    pub paid_by: String,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub date: DateTimeUtc,
    pub category: String,
    pub created_by: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::groups::Entity",
        from = "Column::GroupId",
        to = "super::groups::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Groups,
    #[sea_orm(has_many = "super::splits::Entity")]
    Splits,
    #[sea_orm(has_one = "super::settlements::Entity")]
    SettlementDetails,
}

impl Related<super::groups::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Groups.def()
    }
}

impl Related<super::splits::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Splits.def()
    }
}

impl Related<super::settlements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SettlementDetails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Expense> for ActiveModel {
    fn from(expense: &Expense) -> Self {
        Self {
            id: ActiveValue::Set(expense.id.to_string()),
            group_id: ActiveValue::Set(expense.group_id.clone()),
            paid_by: ActiveValue::Set(expense.paid_by.clone()),
            amount_minor: ActiveValue::Set(expense.amount_minor),
            currency: ActiveValue::Set(expense.currency.code().to_string()),
            description: ActiveValue::Set(expense.description.clone()),
            date: ActiveValue::Set(expense.date),
            category: ActiveValue::Set(expense.category.as_str().to_string()),
            created_by: ActiveValue::Set(expense.created_by.clone()),
            created_at: ActiveValue::Set(expense.created_at),
        }
    }
}

impl TryFrom<Model> for Expense {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&model.id)
                .map_err(|_| EngineError::KeyNotFound("expense not exists".to_string()))?,
            group_id: model.group_id,
            paid_by: model.paid_by,
            amount_minor: model.amount_minor,
            currency: Currency::try_from(model.currency.as_str()).unwrap_or_default(),
            description: model.description,
            date: model.date,
            category: ExpenseCategory::try_from(model.category.as_str())?,
            created_by: model.created_by,
            created_at: model.created_at,
        })
    }
}
