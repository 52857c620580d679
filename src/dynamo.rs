//! DynamoDB conversation store.
//!
//! Uses the DynamoDB JSON protocol (`X-Amz-Target: DynamoDB_20120810.*`)
//! directly. Records are written once with `PutItem` and listed with a
//! filtered `Scan` that follows `LastEvaluatedKey` until the table is
//! exhausted. Expiry is enforced by the table's TTL attribute (`ttl`).

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::aws::{AwsClient, AwsRequest};
use crate::error::{Error, Result};
use crate::models::{ConversationFilter, ConversationRecord};
use crate::traits::ConversationStore;

const SIGNING_NAME: &str = "dynamodb";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const TARGET_PREFIX: &str = "DynamoDB_20120810";

pub struct DynamoConversationStore {
    aws: AwsClient,
    table: String,
}

impl DynamoConversationStore {
    pub fn new(aws: AwsClient, table: impl Into<String>) -> Self {
        Self {
            aws,
            table: table.into(),
        }
    }

    async fn call(&self, operation: &str, body: &Value) -> Result<Value> {
        let request = AwsRequest::new(
            Method::POST,
            SIGNING_NAME,
            self.aws.endpoint("dynamodb"),
            "/".to_string(),
        )
        .header("x-amz-target", format!("{}.{}", TARGET_PREFIX, operation))
        .json(body, CONTENT_TYPE);

        self.aws
            .send_json(request)
            .await
            .map_err(|e| Error::Persistence(format!("{} on {}: {}", operation, self.table, e)))
    }
}

/// Build the `Scan` request body for one page.
fn scan_request(table: &str, filter: &ConversationFilter, start_key: Option<&Value>) -> Value {
    let mut body = json!({ "TableName": table, "Select": "ALL_ATTRIBUTES" });
    let mut expressions = Vec::new();
    let mut names = Map::new();
    let mut values = Map::new();

    if let Some(ref prefix) = filter.date_prefix {
        expressions.push("begins_with(#date, :date)");
        names.insert("#date".into(), json!("date"));
        values.insert(":date".into(), json!({ "S": prefix }));
    }
    if let Some(ref language) = filter.language {
        expressions.push("#lang = :lang");
        names.insert("#lang".into(), json!("language"));
        values.insert(":lang".into(), json!({ "S": language }));
    }

    if !expressions.is_empty() {
        body["FilterExpression"] = json!(expressions.join(" AND "));
        body["ExpressionAttributeNames"] = Value::Object(names);
        body["ExpressionAttributeValues"] = Value::Object(values);
    }
    if let Some(key) = start_key {
        body["ExclusiveStartKey"] = key.clone();
    }
    body
}

#[async_trait]
impl ConversationStore for DynamoConversationStore {
    async fn put(&self, record: &ConversationRecord) -> Result<()> {
        let item = serde_json::to_value(record)
            .map_err(|e| Error::Persistence(format!("cannot encode record: {}", e)))?;
        let encoded = to_attribute(&item);
        let body = json!({ "TableName": self.table, "Item": encoded["M"] });
        self.call("PutItem", &body).await?;
        Ok(())
    }

    async fn scan(&self, filter: &ConversationFilter) -> Result<Vec<ConversationRecord>> {
        let mut records = Vec::new();
        let mut start_key: Option<Value> = None;

        loop {
            let body = scan_request(&self.table, filter, start_key.as_ref());
            let response = self.call("Scan", &body).await?;

            for item in response
                .get("Items")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                match decode_record(item) {
                    Some(record) => records.push(record),
                    None => warn!(item = %item, "skipping undecodable conversation item"),
                }
            }

            match response.get("LastEvaluatedKey") {
                Some(key) if !key.is_null() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(records)
    }
}

fn decode_record(item: &Value) -> Option<ConversationRecord> {
    let plain = from_attribute(&json!({ "M": item }));
    serde_json::from_value(plain).ok()
}

// ============ Attribute value codec ============

/// Encode a JSON value as a DynamoDB attribute value.
pub fn to_attribute(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "NULL": true }),
        Value::Bool(b) => json!({ "BOOL": b }),
        Value::Number(n) => json!({ "N": n.to_string() }),
        Value::String(s) => json!({ "S": s }),
        Value::Array(items) => json!({ "L": items.iter().map(to_attribute).collect::<Vec<_>>() }),
        Value::Object(map) => {
            let encoded: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect();
            json!({ "M": encoded })
        }
    }
}

/// Decode a DynamoDB attribute value into plain JSON.
pub fn from_attribute(attr: &Value) -> Value {
    let Some((tag, inner)) = attr.as_object().and_then(|m| m.iter().next()) else {
        return Value::Null;
    };
    match tag.as_str() {
        "S" => inner.clone(),
        "N" => inner
            .as_str()
            .and_then(|n| {
                n.parse::<i64>()
                    .map(Value::from)
                    .ok()
                    .or_else(|| n.parse::<f64>().ok().map(Value::from))
            })
            .unwrap_or(Value::Null),
        "BOOL" => inner.clone(),
        "L" => Value::Array(
            inner
                .as_array()
                .map(|items| items.iter().map(from_attribute).collect())
                .unwrap_or_default(),
        ),
        "M" => Value::Object(
            inner
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), from_attribute(v))).collect())
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}
