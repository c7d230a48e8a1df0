use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use reserva_core::{ReservationId, ResourceId, Role, UserId};
use reserva_resources::ReservationStatus;

use crate::config::Config;

use super::{
    decode_cursor, encode_cursor, Page, ProjectionLag, ProjectionStore, ProjectionStoreError,
    ReservationFilter, ReservationRow, ResourceRow, UserRow,
};

/// Table names for the query side.
#[derive(Debug, Clone)]
pub struct ProjectionTables {
    pub users: String,
    pub resources: String,
    pub reservations: String,
    pub projection_lag: String,
}

/// DynamoDB-backed projection store.
#[derive(Debug, Clone)]
pub struct DynamoProjectionStore {
    client: aws_sdk_dynamodb::Client,
    tables: ProjectionTables,
}

/// Build a DynamoDB client from configuration, honoring `DYNAMO_ENDPOINT`.
pub(crate) async fn dynamo_client(config: &Config) -> aws_sdk_dynamodb::Client {
    let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws_region.clone()))
        .load()
        .await;

    let mut builder = aws_sdk_dynamodb::config::Builder::from(&base);
    if let Some(endpoint) = &config.dynamo_endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    aws_sdk_dynamodb::Client::from_conf(builder.build())
}

pub(crate) fn dynamo_error(
    e: impl core::fmt::Debug + core::fmt::Display,
) -> ProjectionStoreError {
    ProjectionStoreError::Other(e.to_string())
}

fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

fn n(value: u64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn ts(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

type Item = HashMap<String, AttributeValue>;

fn get_s(item: &Item, name: &str) -> Result<String, ProjectionStoreError> {
    item.get(name)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| ProjectionStoreError::Other(format!("missing string attribute {name}")))
}

fn get_ts(item: &Item, name: &str) -> Result<DateTime<Utc>, ProjectionStoreError> {
    let raw = get_s(item, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProjectionStoreError::Other(format!("bad timestamp in {name}: {e}")))
}

fn opt_ts(item: &Item, name: &str) -> Result<Option<DateTime<Utc>>, ProjectionStoreError> {
    if item.contains_key(name) {
        get_ts(item, name).map(Some)
    } else {
        Ok(None)
    }
}

fn parse_id<T: core::str::FromStr>(raw: &str, name: &str) -> Result<T, ProjectionStoreError>
where
    T::Err: core::fmt::Display,
{
    raw.parse()
        .map_err(|e| ProjectionStoreError::Other(format!("bad {name}: {e}")))
}

fn decode_user(item: &Item) -> Result<UserRow, ProjectionStoreError> {
    let role = match get_s(item, "role")?.as_str() {
        "admin" => Role::Admin,
        "user" => Role::User,
        other => {
            return Err(ProjectionStoreError::Other(format!("unknown role: {other}")));
        }
    };

    Ok(UserRow {
        user_id: parse_id(&get_s(item, "userId")?, "userId")?,
        email: get_s(item, "email")?,
        role,
        created_at_utc: get_ts(item, "createdAtUtc")?,
        last_login_at_utc: opt_ts(item, "lastLoginAtUtc")?,
    })
}

fn decode_resource(item: &Item) -> Result<ResourceRow, ProjectionStoreError> {
    Ok(ResourceRow {
        resource_id: parse_id(&get_s(item, "resourceId")?, "resourceId")?,
        name: get_s(item, "name")?,
        details: get_s(item, "details")?,
        status: get_s(item, "status")?,
        created_at_utc: get_ts(item, "createdAtUtc")?,
        updated_at_utc: get_ts(item, "updatedAtUtc")?,
    })
}

fn decode_reservation(item: &Item) -> Result<ReservationRow, ProjectionStoreError> {
    let status = match get_s(item, "status")?.as_str() {
        "active" => ReservationStatus::Active,
        "cancelled" => ReservationStatus::Cancelled,
        other => {
            return Err(ProjectionStoreError::Other(format!(
                "unknown reservation status: {other}"
            )));
        }
    };

    Ok(ReservationRow {
        reservation_id: parse_id(&get_s(item, "reservationId")?, "reservationId")?,
        resource_id: parse_id(&get_s(item, "resourceId")?, "resourceId")?,
        user_id: parse_id(&get_s(item, "userId")?, "userId")?,
        from_utc: get_ts(item, "fromUtc")?,
        to_utc: get_ts(item, "toUtc")?,
        status,
        created_at_utc: get_ts(item, "createdAtUtc")?,
        cancelled_at_utc: opt_ts(item, "cancelledAtUtc")?,
    })
}

impl DynamoProjectionStore {
    pub fn new(client: aws_sdk_dynamodb::Client, tables: ProjectionTables) -> Self {
        Self { client, tables }
    }

    pub async fn connect(config: &Config) -> Self {
        Self::new(
            dynamo_client(config).await,
            ProjectionTables {
                users: config.users_table.clone(),
                resources: config.resources_table.clone(),
                reservations: config.reservations_table.clone(),
                projection_lag: config.projection_lag_table.clone(),
            },
        )
    }

    /// Apply a conditional update, treating "item does not exist" as a no-op.
    async fn update_if_exists(
        &self,
        table: &str,
        key_name: &'static str,
        key_value: String,
        update_expression: &str,
        names: Vec<(&'static str, &'static str)>,
        values: Vec<(&'static str, AttributeValue)>,
    ) -> Result<(), ProjectionStoreError> {
        let mut request = self
            .client
            .update_item()
            .table_name(table)
            .key(key_name, s(key_value))
            .update_expression(update_expression)
            .condition_expression(format!("attribute_exists({key_name})"));

        for (placeholder, name) in names {
            request = request.expression_attribute_names(placeholder, name);
        }
        for (placeholder, value) in values {
            request = request.expression_attribute_values(placeholder, value);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .map(|svc| svc.is_conditional_check_failed_exception())
                    == Some(true) =>
            {
                // Projection updates for rows that never materialized are
                // skipped, matching the idempotent-op contract.
                Ok(())
            }
            Err(e) => Err(dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(
                &e,
            ))),
        }
    }
}

#[async_trait]
impl ProjectionStore for DynamoProjectionStore {
    async fn put_user(&self, row: UserRow) -> Result<(), ProjectionStoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.tables.users)
            .item("userId", s(row.user_id.to_string()))
            .item("email", s(row.email))
            .item("role", s(row.role.as_str()))
            .item("createdAtUtc", ts(row.created_at_utc));

        if let Some(at) = row.last_login_at_utc {
            request = request.item("lastLoginAtUtc", ts(at));
        }

        request
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn set_user_last_login(
        &self,
        user_id: UserId,
        last_login_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError> {
        self.update_if_exists(
            &self.tables.users,
            "userId",
            user_id.to_string(),
            "SET lastLoginAtUtc = :at",
            vec![],
            vec![(":at", ts(last_login_at_utc))],
        )
        .await
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<UserRow>, ProjectionStoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.tables.users)
            .key("userId", s(user_id.to_string()))
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;

        response.item().map(decode_user).transpose()
    }

    async fn get_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserRow>, ProjectionStoreError> {
        let mut start_key: Option<Item> = None;

        loop {
            let response = self
                .client
                .scan()
                .table_name(&self.tables.users)
                .filter_expression("email = :email")
                .expression_attribute_values(":email", s(email))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;

            if let Some(item) = response.items().first() {
                return decode_user(item).map(Some);
            }

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => return Ok(None),
            }
        }
    }

    async fn put_resource(&self, row: ResourceRow) -> Result<(), ProjectionStoreError> {
        self.client
            .put_item()
            .table_name(&self.tables.resources)
            .item("resourceId", s(row.resource_id.to_string()))
            .item("name", s(row.name))
            .item("details", s(row.details))
            .item("status", s(row.status))
            .item("createdAtUtc", ts(row.created_at_utc))
            .item("updatedAtUtc", ts(row.updated_at_utc))
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn update_resource_details(
        &self,
        resource_id: ResourceId,
        name: String,
        details: String,
        updated_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError> {
        self.update_if_exists(
            &self.tables.resources,
            "resourceId",
            resource_id.to_string(),
            "SET #n = :name, details = :details, updatedAtUtc = :updatedAt",
            vec![("#n", "name")],
            vec![
                (":name", s(name)),
                (":details", s(details)),
                (":updatedAt", ts(updated_at_utc)),
            ],
        )
        .await
    }

    async fn get_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<ResourceRow>, ProjectionStoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.tables.resources)
            .key("resourceId", s(resource_id.to_string()))
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;

        response.item().map(decode_resource).transpose()
    }

    async fn get_resource_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ResourceRow>, ProjectionStoreError> {
        let mut start_key: Option<Item> = None;

        loop {
            let response = self
                .client
                .scan()
                .table_name(&self.tables.resources)
                .filter_expression("#n = :name")
                .expression_attribute_names("#n", "name")
                .expression_attribute_values(":name", s(name))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;

            if let Some(item) = response.items().first() {
                return decode_resource(item).map(Some);
            }

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => return Ok(None),
            }
        }
    }

    async fn put_reservation(&self, row: ReservationRow) -> Result<(), ProjectionStoreError> {
        let status = match row.status {
            ReservationStatus::Active => "active",
            ReservationStatus::Cancelled => "cancelled",
        };

        let mut request = self
            .client
            .put_item()
            .table_name(&self.tables.reservations)
            .item("reservationId", s(row.reservation_id.to_string()))
            .item("resourceId", s(row.resource_id.to_string()))
            .item("userId", s(row.user_id.to_string()))
            .item("fromUtc", ts(row.from_utc))
            .item("toUtc", ts(row.to_utc))
            .item("status", s(status))
            .item("createdAtUtc", ts(row.created_at_utc));

        if let Some(at) = row.cancelled_at_utc {
            request = request.item("cancelledAtUtc", ts(at));
        }

        request
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
        cancelled_at_utc: DateTime<Utc>,
    ) -> Result<(), ProjectionStoreError> {
        self.update_if_exists(
            &self.tables.reservations,
            "reservationId",
            reservation_id.to_string(),
            "SET #s = :status, cancelledAtUtc = :cancelledAt",
            vec![("#s", "status")],
            vec![
                (":status", s("cancelled")),
                (":cancelledAt", ts(cancelled_at_utc)),
            ],
        )
        .await
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<ReservationRow>, ProjectionStoreError> {
        let mut request = self
            .client
            .scan()
            .table_name(&self.tables.reservations)
            .limit(limit.max(1) as i32);

        let mut conditions = Vec::new();
        if let Some(user_id) = filter.user_id {
            conditions.push("userId = :userId");
            request = request.expression_attribute_values(":userId", s(user_id.to_string()));
        }
        if let Some(status) = filter.status {
            conditions.push("#s = :status");
            let status = match status {
                ReservationStatus::Active => "active",
                ReservationStatus::Cancelled => "cancelled",
            };
            request = request
                .expression_attribute_names("#s", "status")
                .expression_attribute_values(":status", s(status));
        }
        if !conditions.is_empty() {
            request = request.filter_expression(conditions.join(" AND "));
        }

        if let Some(cursor) = cursor {
            let continuation = decode_cursor(cursor)?;
            let map = continuation.as_object().ok_or_else(|| {
                ProjectionStoreError::BadCursor("cursor is not an object".to_string())
            })?;
            for (attr, value) in map {
                let raw = value.as_str().ok_or_else(|| {
                    ProjectionStoreError::BadCursor(format!("{attr} is not a string"))
                })?;
                request = request.exclusive_start_key(attr, s(raw));
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;

        let items = response
            .items()
            .iter()
            .map(decode_reservation)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = match response.last_evaluated_key() {
            Some(key) if !key.is_empty() => {
                let mut continuation = serde_json::Map::new();
                for (attr, value) in key {
                    let raw = value.as_s().map_err(|_| {
                        ProjectionStoreError::Other(format!(
                            "non-string continuation attribute {attr}"
                        ))
                    })?;
                    continuation.insert(attr.clone(), json!(raw));
                }
                Some(encode_cursor(&continuation.into())?)
            }
            _ => None,
        };

        Ok(Page { items, next_cursor })
    }

    async fn upsert_lag(&self, lag: ProjectionLag) -> Result<(), ProjectionStoreError> {
        self.client
            .put_item()
            .table_name(&self.tables.projection_lag)
            .item("projection", s(lag.projection))
            .item("lastProjectedAtUtc", ts(lag.last_projected_at_utc))
            .item("eventsBehind", n(lag.events_behind))
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn get_lag(&self) -> Result<Option<ProjectionLag>, ProjectionStoreError> {
        let response = self
            .client
            .get_item()
            .table_name(&self.tables.projection_lag)
            .key("projection", s(ProjectionLag::MAIN))
            .send()
            .await
            .map_err(|e| dynamo_error(aws_sdk_dynamodb::error::DisplayErrorContext(&e)))?;

        let Some(item) = response.item() else {
            return Ok(None);
        };

        let events_behind = item
            .get("eventsBehind")
            .and_then(|v| v.as_n().ok())
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);

        Ok(Some(ProjectionLag {
            projection: get_s(item, "projection")?,
            last_projected_at_utc: get_ts(item, "lastProjectedAtUtc")?,
            events_behind,
        }))
    }
}
