//! Client for the scheduler's REST API: list/fetch/create/scale apps, kill-and-scale tasks,
//! delete an app.
//!
//! [`SchedulerApi`] is the seam the controller and planner program against; [`SchedulerClient`]
//! is the only production implementation, a thin reqwest wrapper in the same shape as a typical
//! REST API client: one small `request` helper that all the public methods funnel through,
//! carrying auth, JSON encoding, and status handling in one place.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::CutoverError;
use crate::model::AppDef;

const CONNECT_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[async_trait]
pub trait SchedulerApi: Send + Sync {
    async fn list_apps(&self) -> Result<Vec<AppDef>, CutoverError>;
    async fn get_app(&self, id: &str) -> Result<AppDef, CutoverError>;
    async fn create_app(&self, app: &AppDef) -> Result<AppDef, CutoverError>;
    async fn scale_app(&self, id: &str, instances: i64) -> Result<(), CutoverError>;
    async fn kill_and_scale(&self, id: &str, task_ids: &[String]) -> Result<(), CutoverError>;
    async fn delete_app(&self, id: &str) -> Result<(), CutoverError>;
}

pub struct SchedulerClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl SchedulerClient {
    pub fn new(base_url: impl Into<String>, credentials: Option<(String, String)>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issues a request, retrying connection-level failures (not non-2xx responses) up to
    /// [`CONNECT_RETRIES`] times, mirroring the original script's `HTTPAdapter(max_retries=3)`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, CutoverError> {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = self.client.request(method.clone(), &url);
            if let Some((user, pass)) = &self.credentials {
                req = req.basic_auth(user, Some(pass));
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => return self.handle_response(&method, &url, resp).await,
                Err(err) if err.is_connect() && attempt < CONNECT_RETRIES => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %err,
                        "connection to scheduler failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
                Err(err) => {
                    return Err(CutoverError::Scheduler {
                        method: method.to_string(),
                        url,
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        body: err.to_string(),
                    });
                }
            }
        }
    }

    async fn handle_response(
        &self,
        method: &Method,
        url: &str,
        resp: reqwest::Response,
    ) -> Result<Value, CutoverError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CutoverError::Scheduler {
                method: method.to_string(),
                url: url.to_string(),
                status,
                body,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        resp.json::<Value>().await.map_err(|err| CutoverError::Scheduler {
            method: method.to_string(),
            url: url.to_string(),
            status,
            body: format!("response body was not valid JSON: {err}"),
        })
    }
}

#[async_trait]
impl SchedulerApi for SchedulerClient {
    async fn list_apps(&self) -> Result<Vec<AppDef>, CutoverError> {
        let body = self.request(Method::GET, "/v2/apps", None).await?;
        let apps = body
            .get("apps")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        apps.into_iter()
            .map(|v| AppDef::from_value(v).map_err(CutoverError::Validation))
            .collect()
    }

    async fn get_app(&self, id: &str) -> Result<AppDef, CutoverError> {
        let path = format!("/v2/apps{id}");
        let body = self.request(Method::GET, &path, None).await?;
        let app = body.get("app").cloned().unwrap_or(body);
        AppDef::from_value(app).map_err(CutoverError::Validation)
    }

    async fn create_app(&self, app: &AppDef) -> Result<AppDef, CutoverError> {
        let payload = app.to_value();
        let body = self.request(Method::POST, "/v2/apps", Some(&payload)).await?;
        AppDef::from_value(body).map_err(CutoverError::Validation)
    }

    async fn scale_app(&self, id: &str, instances: i64) -> Result<(), CutoverError> {
        let path = format!("/v2/apps{id}");
        let payload = json!({ "instances": instances });
        self.request(Method::PUT, &path, Some(&payload)).await?;
        Ok(())
    }

    async fn kill_and_scale(&self, _id: &str, task_ids: &[String]) -> Result<(), CutoverError> {
        let payload = json!({ "ids": task_ids });
        self.request(Method::POST, "/v2/tasks/delete?scale=true", Some(&payload))
            .await?;
        Ok(())
    }

    async fn delete_app(&self, id: &str) -> Result<(), CutoverError> {
        let path = format!("/v2/apps{id}");
        self.request(Method::DELETE, &path, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_doubling_slash() {
        let client = SchedulerClient::new("http://marathon:8080/", None);
        assert_eq!(client.url("/v2/apps"), "http://marathon:8080/v2/apps");
    }
}
