//! DynamoDB patch catalog.
//!
//! Rows live under partition key `PK = "OS#<os>"`. The ingestion jobs have
//! written the KB under two attribute names over time, so both are read.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use patchflow_core::clients::{CatalogRow, ClientError, PatchCatalog};
use patchflow_core::OsKey;

use crate::request_error;

const SERVICE: &str = "dynamodb";

pub struct DynamoCatalog {
    client: Client,
    table: String,
}

impl DynamoCatalog {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl PatchCatalog for DynamoCatalog {
    async fn list_by_os(&self, os: &OsKey) -> Result<Vec<CatalogRow>, ClientError> {
        let items: Vec<HashMap<String, AttributeValue>> = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression("PK = :pk")
            .expression_attribute_values(":pk", AttributeValue::S(os.catalog_partition_key()))
            .into_paginator()
            .items()
            .send()
            .collect::<Result<Vec<_>, _>>()
            .await
            .map_err(|e| request_error(SERVICE, e))?;

        tracing::debug!(table = %self.table, os = %os, items = items.len(), "Catalog query complete");

        Ok(items.iter().map(row_from_item).collect())
    }
}

fn row_from_item(item: &HashMap<String, AttributeValue>) -> CatalogRow {
    CatalogRow {
        kb: string_attr(item, &["kb", "kbArticle"]),
        severity: string_attr(item, &["severity"]),
        description: string_attr(item, &["description", "impact"]),
        release_date: string_attr(item, &["releaseDate", "publishedDate"]),
        ttl: item
            .get("TTL")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok()),
    }
}

/// First non-empty string attribute among `names`.
fn string_attr(item: &HashMap<String, AttributeValue>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| item.get(*name))
        .filter_map(|value| value.as_s().ok())
        .find(|s| !s.trim().is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(pairs: &[(&str, AttributeValue)]) -> HashMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn reads_primary_attribute_names() {
        let row = row_from_item(&item(&[
            ("PK", AttributeValue::S("OS#W2019".into())),
            ("kb", AttributeValue::S("KB5001234".into())),
            ("severity", AttributeValue::S("Critical".into())),
            ("description", AttributeValue::S("Remote code execution".into())),
            ("releaseDate", AttributeValue::S("2026-10-14".into())),
            ("TTL", AttributeValue::N("1792000000".into())),
        ]));
        assert_eq!(row.kb.as_deref(), Some("KB5001234"));
        assert_eq!(row.severity.as_deref(), Some("Critical"));
        assert_eq!(row.release_date.as_deref(), Some("2026-10-14"));
        assert_eq!(row.ttl, Some(1_792_000_000));
    }

    #[test]
    fn falls_back_to_alternate_names() {
        let row = row_from_item(&item(&[
            ("kb", AttributeValue::S(String::new())),
            ("kbArticle", AttributeValue::S("KB42".into())),
            ("impact", AttributeValue::S("Elevation of privilege".into())),
            ("publishedDate", AttributeValue::S("2026-09-09".into())),
        ]));
        assert_eq!(row.kb.as_deref(), Some("KB42"));
        assert_eq!(row.description.as_deref(), Some("Elevation of privilege"));
        assert_eq!(row.release_date.as_deref(), Some("2026-09-09"));
        assert_eq!(row.ttl, None);
    }

    #[test]
    fn non_string_kb_is_missing() {
        let row = row_from_item(&item(&[("kb", AttributeValue::N("5001234".into()))]));
        assert!(row.kb.is_none());
    }
}
