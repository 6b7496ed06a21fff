use cdn_gateway_entity::publishes::{ActiveModel, Column, Entity, Model};
use chrono::NaiveDateTime;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    schemas::{now_naive, PublishState},
};

pub async fn create<C: ConnectionTrait>(db: &C, env: &str) -> Result<Model, ServiceError> {
    let model = ActiveModel {
        id: Set(Uuid::new_v4()),
        env: Set(env.to_string()),
        state: Set(PublishState::Pending.as_str().to_string()),
        updated: Set(Some(now_naive())),
    };
    let res = Entity::insert(model).exec_with_returning(db).await?;
    Ok(res)
}

pub async fn get<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Model>, ServiceError> {
    Ok(Entity::find_by_id(id).one(db).await?)
}

/// Load with a row lock, for state transitions.
pub async fn get_for_update<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> Result<Option<Model>, ServiceError> {
    Ok(Entity::find_by_id(id).lock_exclusive().one(db).await?)
}

pub async fn set_state<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    state: PublishState,
) -> Result<(), ServiceError> {
    Entity::update_many()
        .col_expr(Column::State, Expr::value(state.as_str()))
        .col_expr(Column::Updated, Expr::value(now_naive()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn find_missing_updated<C: ConnectionTrait>(db: &C) -> Result<Vec<Model>, ServiceError> {
    Ok(Entity::find().filter(Column::Updated.is_null()).all(db).await?)
}

pub async fn set_updated<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    now: NaiveDateTime,
) -> Result<(), ServiceError> {
    Entity::update_many()
        .col_expr(Column::Updated, Expr::value(now))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

/// Publishes not in a terminal state whose `updated` predates `cutoff`.
pub async fn find_abandoned<C: ConnectionTrait>(
    db: &C,
    cutoff: NaiveDateTime,
) -> Result<Vec<Model>, ServiceError> {
    let terminal: Vec<&str> = PublishState::terminal().iter().map(|s| s.as_str()).collect();
    Ok(Entity::find()
        .filter(Column::Updated.lt(cutoff))
        .filter(Column::State.is_not_in(terminal))
        .all(db)
        .await?)
}

/// Publishes in a terminal state whose `updated` predates `cutoff`.
pub async fn find_terminal_before<C: ConnectionTrait>(
    db: &C,
    cutoff: NaiveDateTime,
) -> Result<Vec<Model>, ServiceError> {
    let terminal: Vec<&str> = PublishState::terminal().iter().map(|s| s.as_str()).collect();
    Ok(Entity::find()
        .filter(Column::Updated.lt(cutoff))
        .filter(Column::State.is_in(terminal))
        .all(db)
        .await?)
}

/// Delete a publish; items cascade at the schema level.
pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<(), ServiceError> {
    Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}
