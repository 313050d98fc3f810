//! Supabase (PostgREST + Realtime) implementation of `RemoteStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{phoenix, RemoteRow, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::RealtimeEvent;
use crate::util::{compact_text, to_iso8601};

/// PostgREST caps responses; pull in pages of this many rows.
const PAGE_SIZE: usize = 1000;
const ROW_COLUMNS: &str = "id,user_id,data,updated_at";

#[derive(Clone)]
pub struct SupabaseRemote {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for SupabaseRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SupabaseRemote")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SupabaseRemote {
    pub fn new(config: RemoteConfig) -> SyncResult<Self> {
        let config = config.normalized().map_err(SyncError::Configuration)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| {
                SyncError::Configuration(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self { config, client })
    }

    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.config.bearer_token())
    }

    async fn ensure_success(response: Response) -> SyncResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::RemoteRejection {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }
}

#[async_trait]
impl RemoteStore for SupabaseRemote {
    async fn upsert(&self, table: &str, row: &RemoteRow) -> SyncResult<()> {
        let response = self
            .authorized(self.client.post(self.config.rest_url(table)))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str, user_id: &str) -> SyncResult<()> {
        let response = self
            .authorized(self.client.delete(self.config.rest_url(table)))
            .query(&[
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{user_id}")),
            ])
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn select(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRow>> {
        let mut rows: Vec<RemoteRow> = Vec::new();

        loop {
            let after = rows.last().map(|row| (row.updated_at, row.id.as_str()));
            let query = page_query(user_id, since, after);

            let response = self
                .authorized(self.client.get(self.config.rest_url(table)))
                .query(&query)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;
            let page = Self::ensure_success(response)
                .await?
                .json::<Vec<RemoteRow>>()
                .await?;

            let fetched = page.len();
            rows.extend(page);
            if fetched < PAGE_SIZE {
                break;
            }
        }

        tracing::debug!("Selected {} rows from {table}", rows.len());
        Ok(rows)
    }

    async fn subscribe(
        &self,
        user_id: &str,
        tables: &[String],
        cancel: CancellationToken,
    ) -> SyncResult<mpsc::Receiver<RealtimeEvent>> {
        phoenix::open_channel(&self.config, user_id, tables, cancel).await
    }
}

/// Query for one page of a user's rows, ordered by `(updated_at, id)`.
///
/// Pages after the first resume strictly after the last row seen, so rows
/// that change while the pull runs cannot shift the window.
fn page_query(
    user_id: &str,
    since: Option<DateTime<Utc>>,
    after: Option<(DateTime<Utc>, &str)>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("select", ROW_COLUMNS.to_string()),
        ("user_id", format!("eq.{user_id}")),
        ("order", "updated_at.asc,id.asc".to_string()),
        ("limit", PAGE_SIZE.to_string()),
    ];
    if let Some(since) = since {
        query.push(("updated_at", format!("gt.{}", to_iso8601(since))));
    }
    if let Some((updated_at, id)) = after {
        let updated_at = quote_filter_value(&to_iso8601(updated_at));
        let id = quote_filter_value(id);
        query.push((
            "or",
            format!("(updated_at.gt.{updated_at},and(updated_at.eq.{updated_at},id.gt.{id}))"),
        ));
    }
    query
}

/// Quote a value inside a PostgREST logical filter.
fn quote_filter_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            let mut text = message.trim().to_string();
            if let Some(details) = payload.details.filter(|value| !value.trim().is_empty()) {
                text = format!("{text}: {}", details.trim());
            }
            if let Some(hint) = payload.hint.filter(|value| !value.trim().is_empty()) {
                text = format!("{text} (hint: {})", hint.trim());
            }
            return format!("{text} ({})", status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_config() {
        let error = SupabaseRemote::new(RemoteConfig::new("", "anon")).unwrap_err();
        assert!(matches!(error, SyncError::Configuration(_)));
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let remote = SupabaseRemote::new(
            RemoteConfig::new("https://project.supabase.co", "anon-secret")
                .with_access_token("jwt-secret"),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("anon-secret"));
        assert!(!debug.contains("jwt-secret"));
    }

    #[test]
    fn parse_api_error_prefers_postgrest_message() {
        let body = r#"{
            "code": "23505",
            "message": "duplicate key value violates unique constraint",
            "details": "Key (id)=(1001) already exists.",
            "hint": null
        }"#;
        assert_eq!(
            parse_api_error(StatusCode::CONFLICT, body),
            "duplicate key value violates unique constraint: Key (id)=(1001) already exists. (409)"
        );
    }

    #[test]
    fn parse_api_error_falls_back_to_body() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down (502)"
        );
        assert_eq!(parse_api_error(StatusCode::UNAUTHORIZED, "  "), "HTTP 401");
    }

    #[test]
    fn first_page_filters_user_and_cursor() {
        let since = crate::util::parse_iso8601("2024-01-01T00:00:00Z");
        let query = page_query("u1", since, None);
        assert!(query.contains(&("user_id", "eq.u1".to_string())));
        assert!(query.contains(&("updated_at", "gt.2024-01-01T00:00:00Z".to_string())));
        assert!(query.iter().all(|(key, _)| *key != "or" && *key != "offset"));
    }

    #[test]
    fn later_pages_resume_after_last_row() {
        let last = crate::util::parse_iso8601("2024-02-01T10:00:00.5Z").unwrap();
        let query = page_query("u1", None, Some((last, "1001")));
        let resume = query
            .iter()
            .find(|(key, _)| *key == "or")
            .map(|(_, value)| value.as_str());
        assert_eq!(
            resume,
            Some(
                r#"(updated_at.gt."2024-02-01T10:00:00.500Z",and(updated_at.eq."2024-02-01T10:00:00.500Z",id.gt."1001"))"#
            )
        );
    }

    #[test]
    fn filter_values_escape_quotes() {
        assert_eq!(quote_filter_value(r#"a"b\c"#), r#""a\"b\\c""#);
    }
}
