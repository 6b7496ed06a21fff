use cdn_gateway_entity::published_paths::{ActiveModel, Column, Entity, Model};
use chrono::NaiveDateTime;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    sea_query::OnConflict,
};

use crate::error::ServiceError;

/// Record paths as published on an environment. Idempotent on
/// `(env, web_uri)`; repeated commits only refresh `updated`.
pub async fn upsert_many<C: ConnectionTrait>(
    db: &C,
    env: &str,
    web_uris: impl IntoIterator<Item = String>,
    now: NaiveDateTime,
) -> Result<(), ServiceError> {
    let models: Vec<ActiveModel> = web_uris
        .into_iter()
        .map(|web_uri| ActiveModel {
            id: NotSet,
            env: Set(env.to_string()),
            web_uri: Set(web_uri),
            updated: Set(now),
        })
        .collect();

    Entity::insert_many(models)
        .on_conflict(
            OnConflict::columns([Column::Env, Column::WebUri])
                .update_column(Column::Updated)
                .to_owned(),
        )
        .on_empty_do_nothing()
        .exec(db)
        .await?;
    Ok(())
}

/// Paths previously published under `prefix/` on the environment.
pub async fn under_prefix<C: ConnectionTrait>(
    db: &C,
    env: &str,
    prefix: &str,
) -> Result<Vec<Model>, ServiceError> {
    Ok(Entity::find()
        .filter(Column::Env.eq(env))
        .filter(Column::WebUri.like(format!("{prefix}/%")))
        .all(db)
        .await?)
}
