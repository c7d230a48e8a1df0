//! Process configuration from environment variables.

use std::collections::HashMap;

use tracing::warn;

use reserva_core::StreamType;

/// Recognized configuration, with defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub jwt_secret: String,
    pub admin_bootstrap_key: String,

    pub aws_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_bucket_events: String,

    /// `None` disables publishing (tests and single-process modes).
    pub sqs_queue_url: Option<String>,
    pub sqs_endpoint: Option<String>,

    pub dynamo_endpoint: Option<String>,
    pub users_table: String,
    pub resources_table: String,
    pub reservations_table: String,
    pub idempotency_table: String,
    pub projection_lag_table: String,

    pub page_limit_default: u32,
    pub snapshot_every_default: u64,
    /// Per-stream-type snapshot thresholds; `0` disables snapshots for that
    /// type.
    pub snapshot_by_stream_type: HashMap<StreamType, u64>,

    pub version_conflict_max_retries: u32,
    pub emit_concurrency_conflict_unresolved_event: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            jwt_secret: "dev-secret".to_string(),
            admin_bootstrap_key: "bootstrap-local-key".to_string(),
            aws_region: "us-east-1".to_string(),
            s3_endpoint: None,
            s3_bucket_events: "reserva-events".to_string(),
            sqs_queue_url: None,
            sqs_endpoint: None,
            dynamo_endpoint: None,
            users_table: "users_projection".to_string(),
            resources_table: "resources_projection".to_string(),
            reservations_table: "reservations_projection".to_string(),
            idempotency_table: "idempotency_table".to_string(),
            projection_lag_table: "projection_lag".to_string(),
            page_limit_default: 20,
            snapshot_every_default: 500,
            snapshot_by_stream_type: default_snapshot_thresholds(),
            version_conflict_max_retries: 1,
            emit_concurrency_conflict_unresolved_event: false,
        }
    }
}

fn default_snapshot_thresholds() -> HashMap<StreamType, u64> {
    HashMap::from([(StreamType::Resource, 500), (StreamType::User, 0)])
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration from an arbitrary lookup (testable seam).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let string = |name: &str, fallback: String| -> String {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => value,
                _ => fallback,
            }
        };
        let optional = |name: &str| -> Option<String> {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        let jwt_secret = match lookup("JWT_SECRET") {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                warn!("JWT_SECRET not set; using insecure dev default");
                defaults.jwt_secret.clone()
            }
        };

        let port = lookup("PORT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.port);

        let page_limit_default = lookup("PAGE_LIMIT_DEFAULT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.page_limit_default);

        let snapshot_every_default = lookup("SNAPSHOT_EVERY_DEFAULT")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.snapshot_every_default);

        // Non-negative and finite, or fall back to the default of 1.
        let version_conflict_max_retries = lookup("VERSION_CONFLICT_MAX_RETRIES")
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(defaults.version_conflict_max_retries);

        let emit_concurrency_conflict_unresolved_event =
            match lookup("EMIT_CONCURRENCY_CONFLICT_UNRESOLVED_EVENT") {
                Some(raw) => matches!(raw.trim(), "1" | "true" | "TRUE" | "True"),
                None => defaults.emit_concurrency_conflict_unresolved_event,
            };

        let snapshot_by_stream_type = match lookup("SNAPSHOT_BY_STREAM_TYPE") {
            Some(raw) => parse_snapshot_thresholds(&raw)
                .unwrap_or_else(|| {
                    warn!("SNAPSHOT_BY_STREAM_TYPE is not a valid JSON map; using defaults");
                    defaults.snapshot_by_stream_type.clone()
                }),
            None => defaults.snapshot_by_stream_type.clone(),
        };

        Self {
            port,
            jwt_secret,
            admin_bootstrap_key: string("ADMIN_BOOTSTRAP_KEY", defaults.admin_bootstrap_key),
            aws_region: string("AWS_REGION", defaults.aws_region),
            s3_endpoint: optional("S3_ENDPOINT"),
            s3_bucket_events: string("S3_BUCKET_EVENTS", defaults.s3_bucket_events),
            sqs_queue_url: optional("SQS_QUEUE_URL"),
            sqs_endpoint: optional("SQS_ENDPOINT"),
            dynamo_endpoint: optional("DYNAMO_ENDPOINT"),
            users_table: string("USERS_PROJECTION_TABLE", defaults.users_table),
            resources_table: string("RESOURCES_PROJECTION_TABLE", defaults.resources_table),
            reservations_table: string(
                "RESERVATIONS_PROJECTION_TABLE",
                defaults.reservations_table,
            ),
            idempotency_table: string("IDEMPOTENCY_TABLE", defaults.idempotency_table),
            projection_lag_table: string("PROJECTION_LAG_TABLE", defaults.projection_lag_table),
            page_limit_default,
            snapshot_every_default,
            snapshot_by_stream_type,
            version_conflict_max_retries,
            emit_concurrency_conflict_unresolved_event,
        }
    }

    /// Snapshot threshold for a stream type (`0` disables).
    pub fn snapshot_threshold(&self, stream_type: StreamType) -> u64 {
        self.snapshot_by_stream_type
            .get(&stream_type)
            .copied()
            .unwrap_or(self.snapshot_every_default)
    }
}

fn parse_snapshot_thresholds(raw: &str) -> Option<HashMap<StreamType, u64>> {
    let parsed: HashMap<String, u64> = serde_json::from_str(raw).ok()?;
    let mut thresholds = HashMap::new();
    for (name, threshold) in parsed {
        match name.parse::<StreamType>() {
            Ok(stream_type) => {
                thresholds.insert(stream_type, threshold);
            }
            Err(_) => {
                warn!(stream_type = %name, "ignoring unknown stream type in SNAPSHOT_BY_STREAM_TYPE");
            }
        }
    }
    Some(thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn defaults_match_the_recognized_options() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.page_limit_default, 20);
        assert_eq!(config.snapshot_every_default, 500);
        assert_eq!(config.version_conflict_max_retries, 1);
        assert!(!config.emit_concurrency_conflict_unresolved_event);
        assert_eq!(config.snapshot_threshold(StreamType::Resource), 500);
        assert_eq!(config.snapshot_threshold(StreamType::User), 0);
        assert!(config.sqs_queue_url.is_none());
    }

    #[test]
    fn empty_queue_url_disables_publishing() {
        let config = Config::from_lookup(lookup_from(&[("SQS_QUEUE_URL", "")]));
        assert!(config.sqs_queue_url.is_none());

        let config = Config::from_lookup(lookup_from(&[(
            "SQS_QUEUE_URL",
            "http://localhost:4566/000000000000/events",
        )]));
        assert!(config.sqs_queue_url.is_some());
    }

    #[test]
    fn snapshot_thresholds_parse_from_json() {
        let config = Config::from_lookup(lookup_from(&[(
            "SNAPSHOT_BY_STREAM_TYPE",
            r#"{"resource": 2, "user": 10}"#,
        )]));
        assert_eq!(config.snapshot_threshold(StreamType::Resource), 2);
        assert_eq!(config.snapshot_threshold(StreamType::User), 10);
    }

    #[test]
    fn invalid_retry_budget_falls_back_to_one() {
        for raw in ["-3", "abc", "1.5", ""] {
            let config =
                Config::from_lookup(lookup_from(&[("VERSION_CONFLICT_MAX_RETRIES", raw)]));
            assert_eq!(config.version_conflict_max_retries, 1, "raw = {raw:?}");
        }

        let config = Config::from_lookup(lookup_from(&[("VERSION_CONFLICT_MAX_RETRIES", "0")]));
        assert_eq!(config.version_conflict_max_retries, 0);
    }

    #[test]
    fn telemetry_flag_parses_truthy_values() {
        for raw in ["1", "true", "TRUE", "True"] {
            let config = Config::from_lookup(lookup_from(&[(
                "EMIT_CONCURRENCY_CONFLICT_UNRESOLVED_EVENT",
                raw,
            )]));
            assert!(config.emit_concurrency_conflict_unresolved_event);
        }

        let config = Config::from_lookup(lookup_from(&[(
            "EMIT_CONCURRENCY_CONFLICT_UNRESOLVED_EVENT",
            "off",
        )]));
        assert!(!config.emit_concurrency_conflict_unresolved_event);
    }
}
