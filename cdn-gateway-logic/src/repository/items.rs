use cdn_gateway_entity::items::{ActiveModel, Column, Entity, Model};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    schemas::{now_naive, ItemInput},
};

/// Append validated items to a publish. `(publish_id, web_uri)` is unique;
/// clients re-submitting a path get a constraint violation surfaced as a
/// database error.
pub async fn insert_many<C: ConnectionTrait>(
    db: &C,
    publish_id: Uuid,
    items: Vec<ItemInput>,
) -> Result<(), ServiceError> {
    let now = now_naive();
    let models = items.into_iter().map(|item| ActiveModel {
        id: Set(Uuid::new_v4()),
        publish_id: Set(publish_id),
        web_uri: Set(item.web_uri),
        object_key: Set(item.object_key),
        link_to: Set(item.link_to),
        content_type: Set(item.content_type),
        updated: Set(Some(now)),
    });

    Entity::insert_many(models)
        .on_empty_do_nothing()
        .exec(db)
        .await?;
    Ok(())
}

pub async fn count<C: ConnectionTrait>(db: &C, publish_id: Uuid) -> Result<u64, ServiceError> {
    Ok(Entity::find()
        .filter(Column::PublishId.eq(publish_id))
        .count(db)
        .await?)
}

/// One page of a publish's items in stable (web_uri) order. Keyset paging:
/// pass the last `web_uri` of the previous page to continue.
pub async fn load_page<C: ConnectionTrait>(
    db: &C,
    publish_id: Uuid,
    after_web_uri: Option<&str>,
    limit: u64,
) -> Result<Vec<Model>, ServiceError> {
    let mut query = Entity::find()
        .filter(Column::PublishId.eq(publish_id))
        .order_by_asc(Column::WebUri)
        .limit(limit);
    if let Some(after) = after_web_uri {
        query = query.filter(Column::WebUri.gt(after));
    }
    Ok(query.all(db).await?)
}

/// All items of a publish in stable order, loaded page by page.
pub async fn load_all<C: ConnectionTrait>(
    db: &C,
    publish_id: Uuid,
    page_size: u64,
) -> Result<Vec<Model>, ServiceError> {
    let mut out: Vec<Model> = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = load_page(db, publish_id, after.as_deref(), page_size).await?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.web_uri.clone());
        let full = page.len() as u64 == page_size;
        out.extend(page);
        if !full {
            break;
        }
    }
    Ok(out)
}
