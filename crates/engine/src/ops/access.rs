use sea_orm::{DatabaseTransaction, QueryFilter, prelude::*};
use uuid::Uuid;

use crate::{
    EngineError, ResultEngine, expenses, group_members, groups, splits, users,
};

use super::Engine;

impl Engine {
    async fn find_group_by_id(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
    ) -> ResultEngine<Option<groups::Model>> {
        groups::Entity::find_by_id(group_id.to_string())
            .one(db)
            .await
            .map_err(Into::into)
    }

    pub(super) async fn is_group_member(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<bool> {
        let row =
            group_members::Entity::find_by_id((group_id.to_string(), user_id.to_string()))
                .one(db)
                .await?;
        Ok(row.is_some())
    }

    /// Loads a group, requiring `user_id` to be a current member.
    ///
    /// A group the actor cannot see reads as missing, like any other
    /// unauthorized key.
    pub(super) async fn require_group_member(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<groups::Model> {
        let model = self
            .find_group_by_id(db, group_id)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("group not exists".to_string()))?;
        if !self.is_group_member(db, group_id, user_id).await? {
            return Err(EngineError::KeyNotFound("group not exists".to_string()));
        }
        Ok(model)
    }

    pub(super) async fn require_user_exists(
        &self,
        db: &DatabaseTransaction,
        username: &str,
    ) -> ResultEngine<users::Model> {
        users::Entity::find_by_id(username.to_string())
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("user not exists".to_string()))
    }

    /// Requires `member` to be a current member of the group.
    pub(super) async fn require_member_of(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        member: &str,
    ) -> ResultEngine<()> {
        if !self.is_group_member(db, group_id, member).await? {
            return Err(EngineError::KeyNotFound(format!(
                "{member} is not a member of this group"
            )));
        }
        Ok(())
    }

    pub(super) async fn require_expense_in_group(
        &self,
        db: &DatabaseTransaction,
        group_id: &str,
        expense_id: Uuid,
    ) -> ResultEngine<expenses::Model> {
        expenses::Entity::find_by_id(expense_id.to_string())
            .filter(expenses::Column::GroupId.eq(group_id.to_string()))
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("expense not exists".to_string()))
    }

    /// Resolves the receiver of a settlement expense from its single split
    /// row.
    pub(super) async fn settlement_receiver(
        &self,
        db: &DatabaseTransaction,
        expense_id: Uuid,
    ) -> ResultEngine<String> {
        let row = splits::Entity::find()
            .filter(splits::Column::ExpenseId.eq(expense_id.to_string()))
            .one(db)
            .await?
            .ok_or_else(|| EngineError::KeyNotFound("settlement split not exists".to_string()))?;
        Ok(row.user_id)
    }
}
