use pretty_assertions::assert_eq;
use sea_orm::EntityTrait;
use serde_json::json;

use super::{build_state, init_db, stored_message, test_settings};
use crate::{
    queue::message::{delayed_name, DEFAULT_QUEUE},
    repository::{messages, published_paths, tasks},
    schemas::now_naive,
    service,
};

fn previous_config() -> serde_json::Value {
    json!({
        "listing": {},
        "origin_alias": [],
        "releasever_alias": [
            {"src": "/content/dist/rhel8/8", "dest": "/content/dist/rhel8/8.4", "exclude_paths": ["/iso/"]}
        ],
        "rhui_alias": [
            {"src": "/content/dist/rhel8/rhui", "dest": "/content/dist/rhel8", "exclude_paths": []}
        ],
    })
}

fn new_config() -> serde_json::Value {
    // The releasever alias moves 8 -> 8.5; the rhui alias is unchanged.
    json!({
        "listing": {"/content/dist/rhel8": {"values": ["8"]}},
        "origin_alias": [],
        "releasever_alias": [
            {"src": "/content/dist/rhel8/8", "dest": "/content/dist/rhel8/8.5", "exclude_paths": ["/iso/"]}
        ],
        "rhui_alias": [
            {"src": "/content/dist/rhel8/rhui", "dest": "/content/dist/rhel8", "exclude_paths": []}
        ],
    })
}

#[tokio::test]
async fn deploy_config_computes_flush_set_and_delayed_completion() {
    let db = init_db("deploy_flush_set").await;
    let test = build_state(db.client(), test_settings());
    let state = &test.state;
    let conn = db.client();
    test.metadata.set_previous_config(previous_config());

    let now = now_naive();
    published_paths::upsert_many(
        conn.as_ref(),
        "test",
        [
            // Published under the updated src: flushed as-is.
            "/content/dist/rhel8/8/os/repodata/repomd.xml".to_string(),
            // Matches the exclusion pattern: never rewritten, so skipped.
            "/content/dist/rhel8/8/iso/image.iso".to_string(),
            // Published only under the new dest side: flushed at the src
            // spelling.
            "/content/dist/rhel8/8.5/kickstart/tree".to_string(),
            // Dest prefix recurring inside the path: every occurrence is
            // rewritten, not just the leading one.
            "/content/dist/rhel8/8.5/mirror/content/dist/rhel8/8.5/kickstart".to_string(),
            // Unrelated path: untouched.
            "/other/content".to_string(),
        ],
        now,
    )
    .await
    .unwrap();

    let task = service::enqueue_deploy_config(state, "test", new_config())
        .await
        .unwrap();
    let msg = stored_message(conn.as_ref(), task.id).await;
    super::invoke_actor(state, &msg).await.unwrap();

    // Config written once; task stays in progress until the delayed
    // completion fires.
    assert_eq!(test.metadata.written_configs.lock().unwrap().len(), 1);
    let task_row = tasks::get(conn.as_ref(), task.id).await.unwrap().unwrap();
    assert_eq!(task_row.state, "IN_PROGRESS");

    let rows = cdn_gateway_entity::queue_messages::Entity::find()
        .all(conn.as_ref())
        .await
        .unwrap();
    let completion = rows
        .iter()
        .find(|m| m.actor == "complete_deploy_config_task")
        .expect("completion message enqueued");
    assert_eq!(completion.queue, delayed_name(DEFAULT_QUEUE));

    let decoded = messages::decode(completion.clone()).unwrap();
    let flush_paths: Vec<String> = serde_json::from_value(
        decoded.body.args["flush_paths"].clone(),
    )
    .unwrap();
    assert_eq!(
        flush_paths,
        vec![
            // dest-side content rewritten back to src.
            "/content/dist/rhel8/8/kickstart/tree".to_string(),
            // recurring dest prefix rewritten everywhere it appears.
            "/content/dist/rhel8/8/mirror/content/dist/rhel8/8/kickstart".to_string(),
            // src-side content.
            "/content/dist/rhel8/8/os/repodata/repomd.xml".to_string(),
            // listing flush derived from the config.
            "/content/dist/rhel8/listing".to_string(),
        ]
    );

    // Completing the task performs the flush.
    let mut completion_msg = decoded.clone();
    completion_msg.queue = DEFAULT_QUEUE.to_string();
    completion_msg.body.options.eta = None;
    super::invoke_actor(state, &completion_msg).await.unwrap();

    let task_row = tasks::get(conn.as_ref(), task.id).await.unwrap().unwrap();
    assert_eq!(task_row.state, "COMPLETE");
    assert_eq!(test.purge.urls().len(), 1);
}

#[tokio::test]
async fn unchanged_aliases_flush_nothing() {
    let db = init_db("deploy_no_changes").await;
    let test = build_state(db.client(), test_settings());
    let state = &test.state;
    let conn = db.client();
    test.metadata.set_previous_config(previous_config());

    published_paths::upsert_many(
        conn.as_ref(),
        "test",
        ["/content/dist/rhel8/8/os/repodata/repomd.xml".to_string()],
        now_naive(),
    )
    .await
    .unwrap();

    // Deploy the same config again, minus the listing entries.
    let task = service::enqueue_deploy_config(state, "test", previous_config())
        .await
        .unwrap();
    let msg = stored_message(conn.as_ref(), task.id).await;
    super::invoke_actor(state, &msg).await.unwrap();

    let rows = cdn_gateway_entity::queue_messages::Entity::find()
        .all(conn.as_ref())
        .await
        .unwrap();
    let completion = rows
        .iter()
        .find(|m| m.actor == "complete_deploy_config_task")
        .expect("completion message enqueued");
    let decoded = messages::decode(completion.clone()).unwrap();
    let flush_paths: Vec<String> =
        serde_json::from_value(decoded.body.args["flush_paths"].clone()).unwrap();
    assert!(flush_paths.is_empty());
}
