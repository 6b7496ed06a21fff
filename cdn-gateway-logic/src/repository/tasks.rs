use cdn_gateway_entity::{commit_tasks, tasks::{ActiveModel, Column, Entity, Model}};
use chrono::NaiveDateTime;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    schemas::{now_naive, CommitMode, TaskState},
};

/// Create a task. The id is the broker message id driving the task.
pub async fn create<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    deadline: Option<NaiveDateTime>,
) -> Result<Model, ServiceError> {
    let model = ActiveModel {
        id: Set(id),
        state: Set(TaskState::NotStarted.as_str().to_string()),
        updated: Set(Some(now_naive())),
        deadline: Set(deadline),
    };
    Ok(Entity::insert(model).exec_with_returning(db).await?)
}

/// Create a commit task: a task row plus the commit-specific row carrying
/// the publish id and commit mode.
pub async fn create_commit<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    publish_id: Uuid,
    mode: CommitMode,
    deadline: Option<NaiveDateTime>,
) -> Result<Model, ServiceError> {
    let task = create(db, id, deadline).await?;
    let commit = commit_tasks::ActiveModel {
        id: Set(id),
        publish_id: Set(publish_id),
        commit_mode: Set(mode.as_str().to_string()),
    };
    commit_tasks::Entity::insert(commit).exec(db).await?;
    Ok(task)
}

pub async fn get<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Model>, ServiceError> {
    Ok(Entity::find_by_id(id).one(db).await?)
}

pub async fn get_for_update<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> Result<Option<Model>, ServiceError> {
    Ok(Entity::find_by_id(id).lock_exclusive().one(db).await?)
}

pub async fn get_commit_task<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> Result<Option<commit_tasks::Model>, ServiceError> {
    Ok(commit_tasks::Entity::find_by_id(id).one(db).await?)
}

pub async fn set_state<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
    state: TaskState,
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

pub async fn find_abandoned<C: ConnectionTrait>(
    db: &C,
    cutoff: NaiveDateTime,
) -> Result<Vec<Model>, ServiceError> {
    let terminal: Vec<&str> = TaskState::terminal().iter().map(|s| s.as_str()).collect();
    Ok(Entity::find()
        .filter(Column::Updated.lt(cutoff))
        .filter(Column::State.is_not_in(terminal))
        .all(db)
        .await?)
}

pub async fn find_terminal_before<C: ConnectionTrait>(
    db: &C,
    cutoff: NaiveDateTime,
) -> Result<Vec<Model>, ServiceError> {
    let terminal: Vec<&str> = TaskState::terminal().iter().map(|s| s.as_str()).collect();
    Ok(Entity::find()
        .filter(Column::Updated.lt(cutoff))
        .filter(Column::State.is_in(terminal))
        .all(db)
        .await?)
}

/// Delete a task; any commit-task row cascades at the schema level.
pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<(), ServiceError> {
    Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}
