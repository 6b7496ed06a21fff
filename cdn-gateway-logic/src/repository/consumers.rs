use cdn_gateway_entity::queue_consumers::{ActiveModel, Column, Entity, Model};
use chrono::NaiveDateTime;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    sea_query::{Expr, OnConflict},
};

use crate::error::ServiceError;

pub async fn register<C: ConnectionTrait>(
    db: &C,
    id: &str,
    now: NaiveDateTime,
) -> Result<(), ServiceError> {
    let model = ActiveModel {
        id: Set(id.to_string()),
        last_alive: Set(now),
    };
    Entity::insert(model)
        .on_conflict(
            OnConflict::column(Column::Id)
                .update_column(Column::LastAlive)
                .to_owned(),
        )
        .exec(db)
        .await?;
    Ok(())
}

/// Refresh `last_alive`, keeping the consumer from being treated as dead.
pub async fn touch<C: ConnectionTrait>(
    db: &C,
    id: &str,
    now: NaiveDateTime,
) -> Result<(), ServiceError> {
    Entity::update_many()
        .col_expr(Column::LastAlive, Expr::value(now))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

pub async fn deregister<C: ConnectionTrait>(db: &C, id: &str) -> Result<(), ServiceError> {
    Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}

/// Delete consumers whose `last_alive` predates `cutoff`, returning the
/// removed rows so the caller can log them.
pub async fn delete_dead<C: ConnectionTrait>(
    db: &C,
    cutoff: NaiveDateTime,
) -> Result<Vec<Model>, ServiceError> {
    let dead = Entity::find()
        .filter(Column::LastAlive.lte(cutoff))
        .all(db)
        .await?;

    if !dead.is_empty() {
        Entity::delete_many()
            .filter(Column::Id.is_in(dead.iter().map(|c| c.id.clone())))
            .exec(db)
            .await?;
    }

    Ok(dead)
}

pub async fn get<C: ConnectionTrait>(db: &C, id: &str) -> Result<Option<Model>, ServiceError> {
    Ok(Entity::find_by_id(id).one(db).await?)
}
