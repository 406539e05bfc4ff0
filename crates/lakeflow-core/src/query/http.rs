use super::{ExecutionOptions, QueryJob, QueryService, ResultPage};
use crate::errors::QueryError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// JSON-over-HTTP client for a query gateway fronting the SQL engine.
///
/// Endpoints:
/// - `POST {base}/queries` with `{sql, workgroup, result_location, database}` → `{id}`
/// - `GET {base}/queries/{id}` → [`QueryJob`]
/// - `GET {base}/queries/{id}/results?next_token=` → [`ResultPage`]
/// - `POST {base}/queries/{id}/cancel`
pub struct HttpQueryService {
    pub base_url: String,
    pub token: Option<String>,
    pub client: reqwest::Client,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

impl HttpQueryService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json");
        match &self.token {
            Some(t) => rb.header("Authorization", format!("Bearer {}", t)),
            None => rb,
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        rb: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, QueryError> {
        let resp = rb
            .send()
            .await
            .map_err(|e| QueryError::Submission(format!("{}: {}", what, e)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(QueryError::Submission(format!(
                "{}: gateway returned {}: {}",
                what, status, error_text
            )));
        }
        resp.json::<T>()
            .await
            .map_err(|e| QueryError::Submission(format!("{}: invalid response: {}", what, e)))
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn submit(&self, sql: &str, options: &ExecutionOptions) -> Result<String, QueryError> {
        let body = json!({
            "sql": sql,
            "workgroup": options.workgroup,
            "result_location": options.result_location,
            "database": options.database,
        });
        let rb = self.request(reqwest::Method::POST, "/queries").json(&body);
        let resp: SubmitResponse = self.send_json(rb, "submit").await?;
        Ok(resp.id)
    }

    async fn get_status(&self, job_id: &str) -> Result<QueryJob, QueryError> {
        let rb = self.request(reqwest::Method::GET, &format!("/queries/{}", job_id));
        self.send_json(rb, "status").await
    }

    async fn get_results(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, QueryError> {
        let mut rb = self.request(reqwest::Method::GET, &format!("/queries/{}/results", job_id));
        if let Some(t) = next_token {
            rb = rb.query(&[("next_token", t)]);
        }
        self.send_json(rb, "results").await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), QueryError> {
        let rb = self.request(reqwest::Method::POST, &format!("/queries/{}/cancel", job_id));
        let resp = rb
            .send()
            .await
            .map_err(|e| QueryError::Submission(format!("cancel: {}", e)))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(QueryError::Submission(format!(
                "cancel: gateway returned {}: {}",
                status, error_text
            )));
        }
        Ok(())
    }

    fn service_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Datum, JobStatus};

    #[test]
    fn base_url_is_normalized() {
        let svc = HttpQueryService::new("http://localhost:8080/", None);
        assert_eq!(svc.base_url, "http://localhost:8080");
    }

    #[test]
    fn gateway_payloads_deserialize() {
        let job: QueryJob = serde_json::from_str(
            r#"{"id":"abc","status":"FAILED","reason":"TABLE_NOT_FOUND","statistics":{"rows_affected":3}}"#,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.statistics.rows_affected, Some(3));

        let page: ResultPage =
            serde_json::from_str(r#"{"rows":[["events_csv", 1, null]],"next_token":"t2"}"#).unwrap();
        assert_eq!(page.rows[0].first_text(), Some("events_csv"));
        assert_eq!(page.rows[0].0[1], Datum::Int(1));
        assert_eq!(page.rows[0].0[2], Datum::Null);
        assert_eq!(page.next_token.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_submission_error() {
        let svc = HttpQueryService::new("http://127.0.0.1:9", None);
        let err = svc
            .submit("SELECT 1", &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Submission(_)));
    }
}
