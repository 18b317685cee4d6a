use sea_orm::{ActiveValue, QueryFilter, QueryOrder, TransactionTrait, prelude::*};

use crate::{
    Currency, EngineError, Group, ResultEngine, group_members, groups, users,
    util::validate_text,
};

use super::{Engine, normalize_optional_text, with_tx};

impl Engine {
    /// Creates or updates a user profile row (display name, optional UPI
    /// handle). Auth credentials live elsewhere; this is only the slice of
    /// the profile the ledger needs.
    pub async fn upsert_user(
        &self,
        username: &str,
        display_name: &str,
        upi_id: Option<&str>,
    ) -> ResultEngine<()> {
        let display_name = validate_text(display_name, "display name", 50)?;
        let upi_id = normalize_optional_text(upi_id);

        with_tx!(self, |db_tx| {
            let active = users::ActiveModel {
                username: ActiveValue::Set(username.to_string()),
                display_name: ActiveValue::Set(display_name.clone()),
                upi_id: ActiveValue::Set(upi_id.clone()),
            };

            match users::Entity::find_by_id(username.to_string())
                .one(&db_tx)
                .await?
            {
                Some(_) => {
                    active.update(&db_tx).await?;
                }
                None => {
                    active.insert(&db_tx).await?;
                }
            }

            Ok(())
        })
    }

    /// Creates a group with `user_id` as creator and first member.
    pub async fn create_group(
        &self,
        name: &str,
        user_id: &str,
        currency: Option<Currency>,
    ) -> ResultEngine<String> {
        let name = validate_text(name, "group name", 50)?;
        let group = Group::new(name, user_id, currency.unwrap_or_default());
        let group_id = group.id.clone();

        with_tx!(self, |db_tx| {
            self.require_user_exists(&db_tx, user_id).await?;

            groups::ActiveModel::from(&group).insert(&db_tx).await?;
            group_members::ActiveModel {
                group_id: ActiveValue::Set(group_id.clone()),
                user_id: ActiveValue::Set(user_id.to_string()),
            }
            .insert(&db_tx)
            .await?;

            Ok(group_id.clone())
        })
    }

    /// Adds a member to a group. The actor must already be a member.
    pub async fn add_member(
        &self,
        group_id: &str,
        member_username: &str,
        user_id: &str,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;
            self.require_user_exists(&db_tx, member_username).await?;

            if self.is_group_member(&db_tx, group_id, member_username).await? {
                return Err(EngineError::ExistingKey(member_username.to_string()));
            }

            group_members::ActiveModel {
                group_id: ActiveValue::Set(group_id.to_string()),
                user_id: ActiveValue::Set(member_username.to_string()),
            }
            .insert(&db_tx)
            .await?;

            Ok(())
        })
    }

    /// Removes a member from a group.
    ///
    /// Members remove themselves (leave); only the group creator may remove
    /// someone else. The member's historical expenses and splits stay — the
    /// roster reconciliation keeps showing them as an ex-member.
    pub async fn remove_member(
        &self,
        group_id: &str,
        member_username: &str,
        user_id: &str,
    ) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let group = self.require_group_member(&db_tx, group_id, user_id).await?;
            if member_username != user_id && group.created_by != user_id {
                return Err(EngineError::PermissionDenied(
                    "only the group creator can remove other members".to_string(),
                ));
            }
            self.require_member_of(&db_tx, group_id, member_username)
                .await?;

            group_members::Entity::delete_by_id((
                group_id.to_string(),
                member_username.to_string(),
            ))
            .exec(&db_tx)
            .await?;

            Ok(())
        })
    }

    /// Lists the group's current members (usernames, sorted).
    pub async fn list_members(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> ResultEngine<Vec<String>> {
        with_tx!(self, |db_tx| {
            self.require_group_member(&db_tx, group_id, user_id).await?;

            let rows = group_members::Entity::find()
                .filter(group_members::Column::GroupId.eq(group_id.to_string()))
                .order_by_asc(group_members::Column::UserId)
                .all(&db_tx)
                .await?;
            Ok(rows.into_iter().map(|m| m.user_id).collect())
        })
    }

    /// Loads a group the actor is a member of.
    pub async fn group(&self, group_id: &str, user_id: &str) -> ResultEngine<Group> {
        with_tx!(self, |db_tx| {
            let model = self.require_group_member(&db_tx, group_id, user_id).await?;
            Group::try_from(model)
        })
    }
}
