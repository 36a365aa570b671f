use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, ReturnValue,
    ScalarAttributeType, TableStatus,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use common::{ANONYMOUS, PlayerScore};
use super::{ScoreStore, supplied_name};
use crate::error::StoreError;

const TABLE_READY_POLLS: u32 = 60;
const TABLE_READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

// Service error codes worth retrying; every other service error is permanent.
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "InternalServerError",
    "ServiceUnavailable",
    "TransactionConflictException",
];

type Item = HashMap<String, AttributeValue>;

enum ScoreWrite {
    Set(i64),
    Add(i64),
}

/// Score store backed by a DynamoDB table keyed on `player_id`.
///
/// Works against LocalStack when `AWS_ENDPOINT_URL` is set.
pub struct DynamoScoreStore {
    client: Client,
    table_name: String,
}

impl DynamoScoreStore {
    /// Build a client from the standard AWS environment and make sure the table exists.
    pub async fn from_env(table_name: impl Into<String>) -> Result<Self> {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::with_client(Client::new(&config), table_name).await
    }

    pub async fn with_client(client: Client, table_name: impl Into<String>) -> Result<Self> {
        let store = Self {
            client,
            table_name: table_name.into(),
        };
        info!("Initialized DynamoDB score store on table {}", store.table_name);
        store.ensure_table_exists().await?;
        Ok(store)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn ensure_table_exists(&self) -> Result<()> {
        match self
            .client
            .describe_table()
            .table_name(&self.table_name)
            .send()
            .await
        {
            Ok(_) => {
                debug!("Table {} already exists", self.table_name);
                return Ok(());
            }
            Err(e) => {
                debug!(
                    "Table {} does not exist (error: {}), creating it",
                    self.table_name,
                    DisplayErrorContext(&e)
                );
            }
        }

        info!("Creating DynamoDB table: {}", self.table_name);

        let player_id_attr = AttributeDefinition::builder()
            .attribute_name("player_id")
            .attribute_type(ScalarAttributeType::S)
            .build()?;
        let player_id_key = KeySchemaElement::builder()
            .attribute_name("player_id")
            .key_type(KeyType::Hash)
            .build()?;

        if let Err(e) = self
            .client
            .create_table()
            .table_name(&self.table_name)
            .attribute_definitions(player_id_attr)
            .key_schema(player_id_key)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
        {
            // Another instance may have created it concurrently; the wait below decides.
            warn!(
                "Create table {} failed: {}",
                self.table_name,
                DisplayErrorContext(&e)
            );
        }

        self.wait_until_active().await
    }

    async fn wait_until_active(&self) -> Result<()> {
        for _ in 0..TABLE_READY_POLLS {
            let output = self
                .client
                .describe_table()
                .table_name(&self.table_name)
                .send()
                .await
                .with_context(|| format!("Failed to describe table {}", self.table_name))?;

            if matches!(
                output.table().and_then(|t| t.table_status()),
                Some(TableStatus::Active)
            ) {
                info!("Table {} is active", self.table_name);
                return Ok(());
            }
            tokio::time::sleep(TABLE_READY_POLL_INTERVAL).await;
        }
        bail!("Table {} did not become active in time", self.table_name)
    }

    async fn write(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        score: ScoreWrite,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        // A supplied name replaces the stored one; otherwise keep it, defaulting new rows.
        let name_value = match supplied_name(player_name) {
            Some(name) => ("#name = :name", name),
            None => ("#name = if_not_exists(#name, :name)", ANONYMOUS),
        };
        let (expression, amount, bound) = match score {
            ScoreWrite::Set(value) => (
                format!("SET #score = :score, #ts = :ts, {}", name_value.0),
                value,
                None,
            ),
            ScoreWrite::Add(delta) => (
                format!("SET #ts = :ts, {} ADD #score :score", name_value.0),
                delta,
                Some(Self::add_bound(delta)),
            ),
        };

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("player_id", Self::av_s(player_id))
            .update_expression(expression)
            .expression_attribute_names("#score", "score")
            .expression_attribute_names("#name", "player_name")
            .expression_attribute_names("#ts", "last_updated")
            .expression_attribute_values(":score", Self::av_n(amount))
            .expression_attribute_values(":name", Self::av_s(name_value.1))
            .expression_attribute_values(":ts", Self::av_s(&Self::format_timestamp(at)))
            .return_values(ReturnValue::AllNew);
        if let Some((condition, limit)) = bound {
            request = request
                .condition_expression(condition)
                .expression_attribute_values(":limit", Self::av_n(limit));
        }

        let output = request.send().await.map_err(|e| {
            if e
                .as_service_error()
                .is_some_and(|e| e.is_conditional_check_failed_exception())
            {
                StoreError::Rejected {
                    player_id: player_id.to_string(),
                    reason: format!("adding {} would overflow the stored score", amount),
                }
            } else {
                Self::classify("update item", e)
            }
        })?;

        let attributes = output.attributes.unwrap_or_default();
        Self::item_to_score(&attributes)
    }

    /// Condition keeping `score + delta` inside `i64`. DynamoDB numbers are
    /// wider, so an unbounded ADD would store a row we cannot read back.
    fn add_bound(delta: i64) -> (&'static str, i64) {
        if delta >= 0 {
            ("attribute_not_exists(#score) OR #score <= :limit", i64::MAX - delta)
        } else {
            ("attribute_not_exists(#score) OR #score >= :limit", i64::MIN - delta)
        }
    }

    fn is_transient_code(code: Option<&str>) -> bool {
        code.is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code))
    }

    /// Transport failures and throttling are `Unavailable`; anything the
    /// service refused outright is `Failed`.
    fn classify<E, R>(what: &str, err: SdkError<E, R>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let transient = match &err {
            SdkError::ServiceError(_) => {
                Self::is_transient_code(err.as_service_error().and_then(|e| e.code()))
            }
            SdkError::ConstructionFailure(_) => false,
            _ => true,
        };
        let message = format!("{}: {}", what, DisplayErrorContext(err));
        if transient {
            StoreError::Unavailable(message)
        } else {
            StoreError::Failed(message)
        }
    }

    fn av_s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    fn av_n(value: i64) -> AttributeValue {
        AttributeValue::N(value.to_string())
    }

    fn extract_string(item: &Item, key: &str) -> Option<String> {
        item.get(key).and_then(|v| v.as_s().ok()).cloned()
    }

    fn format_timestamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Accepts RFC 3339 as well as naive ISO-8601 timestamps, which other
    /// writers of the same table (e.g. the webhook function) produce.
    fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    fn item_to_score(item: &Item) -> Result<PlayerScore, StoreError> {
        let player_id = Self::extract_string(item, "player_id").ok_or_else(|| StoreError::Corrupt {
            player_id: "<unknown>".to_string(),
            reason: "missing player_id".to_string(),
        })?;
        let corrupt = |reason: String| StoreError::Corrupt {
            player_id: player_id.clone(),
            reason,
        };

        let raw_score = item
            .get("score")
            .and_then(|v| v.as_n().ok())
            .ok_or_else(|| corrupt("missing numeric score".to_string()))?;
        let score = raw_score
            .parse::<i64>()
            .map_err(|_| corrupt(format!("score `{}` is not a 64-bit integer", raw_score)))?;

        let raw_timestamp = Self::extract_string(item, "last_updated")
            .or_else(|| Self::extract_string(item, "timestamp"))
            .ok_or_else(|| corrupt("missing last_updated".to_string()))?;
        let last_updated = Self::parse_timestamp(&raw_timestamp)
            .ok_or_else(|| corrupt(format!("unparseable timestamp `{}`", raw_timestamp)))?;

        let player_name = Self::extract_string(item, "player_name");
        Ok(PlayerScore::new(
            player_id.clone(),
            player_name.as_deref(),
            score,
            last_updated,
        ))
    }
}

#[async_trait]
impl ScoreStore for DynamoScoreStore {
    async fn put(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        score: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        self.write(player_id, player_name, ScoreWrite::Set(score), at).await
    }

    async fn add(
        &self,
        player_id: &str,
        player_name: Option<&str>,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<PlayerScore, StoreError> {
        self.write(player_id, player_name, ScoreWrite::Add(delta), at).await
    }

    async fn get(&self, player_id: &str) -> Result<Option<PlayerScore>, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("player_id", Self::av_s(player_id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| Self::classify("get item", e))?;

        output.item.as_ref().map(Self::item_to_score).transpose()
    }

    async fn get_all(&self) -> Result<Vec<PlayerScore>, StoreError> {
        let mut rows = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table_name)
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| Self::classify("scan table", e))?;

            for item in output.items.unwrap_or_default() {
                match Self::item_to_score(&item) {
                    Ok(row) => rows.push(row),
                    Err(e) => warn!("Skipping leaderboard row: {}", e),
                }
            }

            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        debug!("Scanned {} rows from {}", rows.len(), self.table_name);
        Ok(rows)
    }
}
