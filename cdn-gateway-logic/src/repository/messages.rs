use cdn_gateway_entity::queue_messages::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseBackend, EntityTrait, PaginatorTrait,
    QueryFilter, Statement, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::{error::ServiceError, queue::message::QueueMessage};

/// Insert or replace a message row. Enqueueing an existing id replaces its
/// body and clears `consumer_id`, which is how retries re-submit a message.
pub async fn upsert<C: ConnectionTrait>(db: &C, msg: &QueueMessage) -> Result<(), ServiceError> {
    let model = ActiveModel {
        id: Set(msg.id),
        queue: Set(msg.queue.clone()),
        actor: Set(msg.actor.clone()),
        consumer_id: Set(None),
        body: Set(serde_json::to_value(&msg.body)?),
    };

    Entity::insert(model)
        .on_conflict(
            OnConflict::column(Column::Id)
                .update_columns([
                    Column::Queue,
                    Column::Actor,
                    Column::ConsumerId,
                    Column::Body,
                ])
                .to_owned(),
        )
        .exec(db)
        .await?;

    Ok(())
}

pub async fn get<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Model>, ServiceError> {
    Ok(Entity::find_by_id(id).one(db).await?)
}

/// Claim the oldest unclaimed message in `queue` for `consumer_id`.
///
/// The row lock skips rows already locked by a concurrent claim, so
/// consumers never block each other and never receive the same message.
pub async fn claim_one<C: ConnectionTrait>(
    db: &C,
    queue: &str,
    consumer_id: &str,
) -> Result<Option<Model>, ServiceError> {
    let stmt = Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        r#"
        UPDATE "queue_messages" SET "consumer_id" = $1
        WHERE "id" = (
            SELECT "id" FROM "queue_messages"
            WHERE "queue" = $2 AND "consumer_id" IS NULL
            ORDER BY ("body"->>'enqueued_at')::bigint ASC NULLS FIRST
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING "id", "queue", "actor", "consumer_id", "body"
        "#,
        [consumer_id.into(), queue.into()],
    );

    Ok(Entity::find().from_raw_sql(stmt).one(db).await?)
}

/// Number of messages currently assigned to the given consumer.
pub async fn pending_count<C: ConnectionTrait>(
    db: &C,
    consumer_id: &str,
) -> Result<u64, ServiceError> {
    Ok(Entity::find()
        .filter(Column::ConsumerId.eq(consumer_id))
        .count(db)
        .await?)
}

/// Delete a processed message. Returns false if the row was already gone.
pub async fn ack<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<bool, ServiceError> {
    let res = Entity::delete_by_id(id).exec(db).await?;
    Ok(res.rows_affected > 0)
}

/// Return a message to the unclaimed pool.
pub async fn release<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<(), ServiceError> {
    Entity::update_many()
        .col_expr(Column::ConsumerId, sea_orm::sea_query::Expr::value(Option::<String>::None))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(())
}

/// Clear `consumer_id` on messages whose consumer row no longer exists, so
/// that a live consumer can pick them up again. Returns the affected ids.
pub async fn reclaim_lost<C: ConnectionTrait>(db: &C) -> Result<Vec<Uuid>, ServiceError> {
    let stmt = Statement::from_string(
        DatabaseBackend::Postgres,
        r#"
        UPDATE "queue_messages" SET "consumer_id" = NULL
        WHERE "id" IN (
            SELECT m."id" FROM "queue_messages" m
            LEFT JOIN "queue_consumers" c ON m."consumer_id" = c."id"
            WHERE m."consumer_id" IS NOT NULL AND c."id" IS NULL
            FOR UPDATE OF m SKIP LOCKED
        )
        RETURNING "id"
        "#,
    );

    let rows = db.query_all(stmt).await?;
    let ids = rows
        .iter()
        .map(|row| row.try_get_by::<Uuid, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Remove any other messages addressed to the same actor on the given
/// queues, keeping only `keep`. Used to deduplicate scheduler messages.
pub async fn delete_other_for_actor<C: ConnectionTrait>(
    db: &C,
    actor: &str,
    queues: &[String],
    keep: Uuid,
) -> Result<u64, ServiceError> {
    let res = Entity::delete_many()
        .filter(Column::Actor.eq(actor))
        .filter(Column::Queue.is_in(queues.iter().map(String::as_str)))
        .filter(Column::Id.ne(keep))
        .exec(db)
        .await?;
    Ok(res.rows_affected)
}

/// Convert a row back into an in-memory message.
pub fn decode(model: Model) -> Result<QueueMessage, ServiceError> {
    Ok(QueueMessage {
        id: model.id,
        queue: model.queue,
        actor: model.actor,
        body: serde_json::from_value(model.body)?,
    })
}
