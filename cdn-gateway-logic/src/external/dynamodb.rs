//! DynamoDB-backed implementation of [`MetadataTable`].
//!
//! Each item is keyed `(web_uri, from_date)`. Config blobs live in the
//! environment's config table under a fixed id, newest `from_date` wins.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::{
    config::Region,
    types::{AttributeValue, DeleteRequest, PutRequest, WriteRequest},
    Client,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    error::ServiceError,
    external::batch::{BatchKind, ExternalItem, MetadataTable},
    settings::Environment,
};

const CONFIG_ID: &str = "cdn-config";

pub struct DynamoMetadataTable {
    clients: Mutex<HashMap<String, Client>>,
}

impl DynamoMetadataTable {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, env: &Environment) -> Client {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&env.name) {
            return client.clone();
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = &env.aws_profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = &env.aws_region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &env.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) =
            (&env.aws_access_key_id, &env.aws_secret_access_key)
        {
            loader =
                loader.credentials_provider(Credentials::from_keys(key_id, secret, None));
        }
        let config = loader.load().await;

        let client = Client::new(&config);
        clients.insert(env.name.clone(), client.clone());
        client
    }
}

impl Default for DynamoMetadataTable {
    fn default() -> Self {
        Self::new()
    }
}

fn put_attributes(item: &ExternalItem) -> HashMap<String, AttributeValue> {
    let mut attrs = key_attributes(item);
    if let Some(object_key) = &item.object_key {
        attrs.insert(
            "object_key".to_string(),
            AttributeValue::S(object_key.clone()),
        );
    }
    if let Some(content_type) = &item.content_type {
        attrs.insert(
            "content_type".to_string(),
            AttributeValue::S(content_type.clone()),
        );
    }
    attrs
}

fn key_attributes(item: &ExternalItem) -> HashMap<String, AttributeValue> {
    HashMap::from([
        (
            "web_uri".to_string(),
            AttributeValue::S(item.web_uri.clone()),
        ),
        (
            "from_date".to_string(),
            AttributeValue::S(item.from_date.clone()),
        ),
    ])
}

fn attr_string(attrs: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    attrs.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn decode_write_request(request: &WriteRequest) -> Option<ExternalItem> {
    let attrs = request
        .put_request()
        .map(PutRequest::item)
        .or_else(|| request.delete_request().map(DeleteRequest::key))?;
    Some(ExternalItem {
        web_uri: attr_string(attrs, "web_uri")?,
        from_date: attr_string(attrs, "from_date")?,
        object_key: attr_string(attrs, "object_key"),
        content_type: attr_string(attrs, "content_type"),
    })
}

#[async_trait]
impl MetadataTable for DynamoMetadataTable {
    async fn write_batch(
        &self,
        env: &Environment,
        items: &[ExternalItem],
        kind: BatchKind,
    ) -> Result<Vec<ExternalItem>, ServiceError> {
        let client = self.client(env).await;

        let requests = items
            .iter()
            .map(|item| {
                let request = match kind {
                    BatchKind::Put => WriteRequest::builder().put_request(
                        PutRequest::builder()
                            .set_item(Some(put_attributes(item)))
                            .build()
                            .map_err(|err| ServiceError::External(err.to_string()))?,
                    ),
                    BatchKind::Delete => WriteRequest::builder().delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(key_attributes(item)))
                            .build()
                            .map_err(|err| ServiceError::External(err.to_string()))?,
                    ),
                };
                Ok(request.build())
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        let response = client
            .batch_write_item()
            .request_items(&env.table, requests)
            .send()
            .await
            .map_err(|err| ServiceError::External(err.to_string()))?;

        let unprocessed = response
            .unprocessed_items()
            .and_then(|map| map.get(&env.table))
            .map(|requests| {
                requests
                    .iter()
                    .filter_map(decode_write_request)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(unprocessed)
    }

    async fn write_config(
        &self,
        env: &Environment,
        config: &Value,
        from_date: &str,
    ) -> Result<(), ServiceError> {
        let client = self.client(env).await;
        client
            .put_item()
            .table_name(env.config_table())
            .item("config_id", AttributeValue::S(CONFIG_ID.to_string()))
            .item("from_date", AttributeValue::S(from_date.to_string()))
            .item(
                "config",
                AttributeValue::S(serde_json::to_string(config)?),
            )
            .send()
            .await
            .map_err(|err| ServiceError::External(err.to_string()))?;
        Ok(())
    }

    async fn load_config(&self, env: &Environment) -> Result<Option<Value>, ServiceError> {
        let client = self.client(env).await;
        let response = client
            .query()
            .table_name(env.config_table())
            .key_condition_expression("config_id = :config_id")
            .expression_attribute_values(
                ":config_id",
                AttributeValue::S(CONFIG_ID.to_string()),
            )
            .scan_index_forward(false)
            .limit(1)
            .send()
            .await
            .map_err(|err| ServiceError::External(err.to_string()))?;

        let Some(item) = response.items().first() else {
            return Ok(None);
        };
        let Some(raw) = attr_string(item, "config") else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
