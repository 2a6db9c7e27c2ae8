//! Airtable REST API reader

use super::{find_table, view_metadata, RequestRateLimiter, SourceReader, TableSchema, ViewMetadata};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::record::RawRecord;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct RecordsPage {
    #[serde(default)]
    records: Vec<RawRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    tables: Vec<TableSchema>,
}

/// Reader for one table of an Airtable base
pub struct AirtableReader {
    client: Client,
    base_url: Url,
    base_id: String,
    table_name: String,
    api_key: String,
    limiter: RequestRateLimiter,
}

impl AirtableReader {
    pub fn new(config: &SourceConfig, api_key: String) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| Error::Config(format!("Invalid source api_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Invalid source api_url: {}",
                config.api_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("tablesync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            base_id: config.base_id.clone(),
            table_name: config.table_name.clone(),
            api_key,
            limiter: RequestRateLimiter::new(config.requests_per_second),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid source api_url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        self.limiter.wait().await;
        debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{} ({})", what, url.path())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Unknown views are reported as 422 VIEW_NAME_NOT_FOUND
            if status == StatusCode::UNPROCESSABLE_ENTITY
                && api_error_type(&body).is_some_and(|t| t.ends_with("_NOT_FOUND"))
            {
                return Err(Error::NotFound(format!(
                    "{} ({}): {}",
                    what,
                    url.path(),
                    body.trim()
                )));
            }
            let reason = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "authentication failed",
                _ => "request failed",
            };
            return Err(Error::Retrieval(format!(
                "{} for {}: HTTP {} {}",
                reason,
                what,
                status.as_u16(),
                body.trim()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Retrieval(format!("Malformed response for {}: {}", what, e)))
    }

    /// Schema of every table in the base
    pub async fn fetch_tables(&self) -> Result<Vec<TableSchema>> {
        let url = self.endpoint(&["v0", "meta", "bases", self.base_id.as_str(), "tables"])?;
        let response: TablesResponse = self
            .get_json(url, &format!("base '{}' metadata", self.base_id))
            .await?;
        Ok(response.tables)
    }
}

/// `error.type` of an API error body; some errors carry the type as a bare string
fn api_error_type(body: &str) -> Option<String> {
    let value: JsonValue = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("type")
        .unwrap_or(error)
        .as_str()
        .map(str::to_string)
}

#[async_trait]
impl SourceReader for AirtableReader {
    async fn fetch_records(
        &self,
        view: Option<&str>,
        fields: Option<&[String]>,
    ) -> Result<Vec<RawRecord>> {
        let what = format!("table '{}'", self.table_name);
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut url = self.endpoint(&["v0", self.base_id.as_str(), self.table_name.as_str()])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", PAGE_SIZE);
                if let Some(view) = view {
                    query.append_pair("view", view);
                }
                for field in fields.into_iter().flatten() {
                    query.append_pair("fields[]", field);
                }
                if let Some(offset) = &offset {
                    query.append_pair("offset", offset);
                }
            }

            let page: RecordsPage = self.get_json(url, &what).await?;
            debug!("Fetched page of {} records", page.records.len());
            records.extend(page.records);

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        match view {
            Some(view) => info!(
                "Successfully fetched {} records from view '{}'",
                records.len(),
                view
            ),
            None => info!("Successfully fetched {} records from table", records.len()),
        }
        Ok(records)
    }

    async fn fetch_field_types(&self) -> Result<HashMap<String, String>> {
        let tables = self.fetch_tables().await?;
        Ok(find_table(&tables, &self.table_name)?.field_types())
    }

    async fn fetch_view_metadata(&self, table: &str, view: Option<&str>) -> Result<ViewMetadata> {
        let tables = self.fetch_tables().await?;
        view_metadata(find_table(&tables, table)?, view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> SourceConfig {
        SourceConfig {
            base_id: "appBase".into(),
            table_name: "People".into(),
            view_name: None,
            api_url: server.uri(),
            api_key_secret: "AIRTABLE_API_KEY".into(),
            requests_per_second: 100,
            timeout_secs: 5,
        }
    }

    fn reader(server: &MockServer) -> AirtableReader {
        AirtableReader::new(&config(server), "key123".into()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_records_follows_offsets() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .and(query_param("offset", "page2"))
            .and(header("authorization", "Bearer key123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"id": "rec2", "createdTime": "2024-01-02T00:00:00.000Z", "fields": {"Name": "Bob"}}]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .and(query_param("view", "Grid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"id": "rec1", "createdTime": "2024-01-01T00:00:00.000Z", "fields": {"Name": "Alice"}}],
                "offset": "page2"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let records = reader(&server)
            .fetch_records(Some("Grid"), None)
            .await
            .unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rec1", "rec2"]);
        assert_eq!(records[1].fields["Name"], "Bob");
    }

    #[tokio::test]
    async fn test_fields_are_sent_as_repeated_params() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .and(query_param("fields[]", "Name"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
            .expect(1)
            .mount(&server)
            .await;

        let fields = vec!["Name".to_string(), "Age".to_string()];
        let records = reader(&server)
            .fetch_records(None, Some(&fields))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_retrieval_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"AUTHENTICATION_REQUIRED\"}"))
            .mount(&server)
            .await;

        let err = reader(&server).fetch_records(None, None).await.unwrap_err();
        assert!(err.is_retrieval_error(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = reader(&server).fetch_records(None, None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_view_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .and(query_param("view", "Kanban"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": {"type": "VIEW_NAME_NOT_FOUND", "message": "Could not find view Kanban"}
            })))
            .mount(&server)
            .await;

        let err = reader(&server)
            .fetch_records(Some("Kanban"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_other_422_stays_retrieval_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "error": {"type": "UNKNOWN_FIELD_NAME", "message": "Unknown field name: \"Nope\""}
            })))
            .mount(&server)
            .await;

        let err = reader(&server).fetch_records(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_malformed_json_is_retrieval_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/appBase/People"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = reader(&server).fetch_records(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_metadata_field_types_and_views() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v0/meta/bases/appBase/tables"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tables": [{
                    "id": "tbl1",
                    "name": "People",
                    "primaryFieldId": "fld1",
                    "fields": [
                        {"id": "fld1", "name": "Name", "type": "singleLineText"},
                        {"id": "fld2", "name": "Age", "type": "number", "options": {"precision": 0}},
                        {"id": "fld3", "name": "Secret", "type": "singleLineText"}
                    ],
                    "views": [
                        {"id": "viw1", "name": "Grid", "type": "grid", "visibleFieldOrder": ["fld2", "fld1", "fld3"], "hiddenFields": ["fld3"]}
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let reader = reader(&server);

        let types = reader.fetch_field_types().await.unwrap();
        assert_eq!(types["Age"], "number");
        assert_eq!(types.len(), 3);

        let view = reader.fetch_view_metadata("People", Some("Grid")).await.unwrap();
        assert_eq!(view.fields, vec!["Age", "Name"]);
        assert_eq!(view.id.as_deref(), Some("viw1"));

        let err = reader
            .fetch_view_metadata("People", Some("Kanban"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = reader.fetch_view_metadata("Places", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_invalid_api_url() {
        let mut config = SourceConfig::default();
        config.api_url = "not a url".into();
        let err = AirtableReader::new(&config, "k".into()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
