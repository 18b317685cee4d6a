//! Users table (minimal entity).
//!
//! The engine stores memberships and split rows by `user_id`, which is the
//! username. Authentication lives in an external collaborator; the engine
//! only needs the display name for rosters and the optional UPI handle for
//! payment intents.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,
    pub display_name: String,
    pub upi_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
