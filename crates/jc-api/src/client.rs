use crate::error::ApiError;
use async_trait::async_trait;
use jc_core::config::ApiConfig;
use jc_core::{
    Ack, ApplicationReceipt, ConsultationBooking, ConsultationSlot, Course, JobApplication, JobFilter,
    JobListing, Lead, LeadReceipt, StatSnapshot, TrackedEvent,
};
use jc_store::{JobSource, StatsSource};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

const STATS: &str = "/api/stats";
const JOBS: &str = "/api/jobs";
const LEADS: &str = "/api/leads";
const CONSULTATIONS: &str = "/api/consultations";
const COURSES: &str = "/api/courses";

/// JSON client for the backend REST endpoints. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = config.auth_token.as_deref() {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ApiError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn current_stats(&self) -> Result<StatSnapshot, ApiError> {
        send(self.get(STATS)?).await
    }

    /// `period` is passed through unchanged (e.g. `month`, `year`).
    pub async fn historical_stats(&self, period: &str) -> Result<Vec<StatSnapshot>, ApiError> {
        send(self.get(&format!("{STATS}/historical"))?.query(&[("period", period)])).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobListing>, ApiError> {
        send(self.get(JOBS)?.query(filter)).await
    }

    pub async fn job(&self, id: u64) -> Result<JobListing, ApiError> {
        send(self.get(&format!("{JOBS}/{id}"))?).await
    }

    pub async fn search_jobs(&self, query: &str) -> Result<Vec<JobListing>, ApiError> {
        send(self.get(&format!("{JOBS}/search"))?.query(&[("q", query)])).await
    }

    pub async fn apply(&self, job_id: u64, application: &JobApplication) -> Result<ApplicationReceipt, ApiError> {
        send(self.post(&format!("{JOBS}/{job_id}/apply"))?.json(application)).await
    }

    pub async fn create_lead(&self, lead: &Lead) -> Result<LeadReceipt, ApiError> {
        send(self.post(LEADS)?.json(lead)).await
    }

    pub async fn track_event(&self, event: &TrackedEvent) -> Result<Ack, ApiError> {
        send(self.post(&format!("{LEADS}/track"))?.json(event)).await
    }

    pub async fn consultation_slots(&self, date: Option<&str>) -> Result<Vec<ConsultationSlot>, ApiError> {
        let mut request = self.get(&format!("{CONSULTATIONS}/slots"))?;
        if let Some(date) = date {
            request = request.query(&[("date", date)]);
        }
        send(request).await
    }

    pub async fn book_consultation(&self, booking: &ConsultationBooking) -> Result<Ack, ApiError> {
        send(self.post(&format!("{CONSULTATIONS}/book"))?.json(booking)).await
    }

    /// The backend does not pin down this shape, so entries stay raw JSON.
    pub async fn my_consultations(&self) -> Result<Vec<Value>, ApiError> {
        send(self.get(&format!("{CONSULTATIONS}/my"))?).await
    }

    pub async fn courses(&self, category: Option<&str>) -> Result<Vec<Course>, ApiError> {
        let mut request = self.get(COURSES)?;
        if let Some(category) = category {
            request = request.query(&[("category", category)]);
        }
        send(request).await
    }

    pub async fn course(&self, id: u64) -> Result<Course, ApiError> {
        send(self.get(&format!("{COURSES}/{id}"))?).await
    }

    pub async fn enroll(&self, course_id: u64) -> Result<Ack, ApiError> {
        send(self.post(&format!("{COURSES}/{course_id}/enroll"))?).await
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let raw = format!("{base}{path}");
        Url::parse(&raw).map_err(|err| ApiError::InvalidUrl {
            url: raw.clone(),
            reason: err.to_string(),
        })
    }

    fn get(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        debug!(event = "api_request", method = "GET", url = %url);
        Ok(self.http.get(url))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.url(path)?;
        debug!(event = "api_request", method = "POST", url = %url);
        Ok(self.http.post(url))
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
    let response = request.send().await?;
    handle_response(response).await
}

async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl StatsSource for ApiClient {
    type Error = ApiError;

    async fn current_stats(&self) -> Result<StatSnapshot, ApiError> {
        ApiClient::current_stats(self).await
    }
}

#[async_trait]
impl JobSource for ApiClient {
    type Error = ApiError;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobListing>, ApiError> {
        ApiClient::list_jobs(self, filter).await
    }

    async fn search_jobs(&self, query: &str) -> Result<Vec<JobListing>, ApiError> {
        ApiClient::search_jobs(self, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(base: &str, token: Option<&str>) -> ApiConfig {
        ApiConfig {
            base_url: Url::parse(base).expect("url"),
            timeout: Duration::from_secs(10),
            auth_token: token.map(str::to_string),
        }
    }

    #[test]
    fn paths_are_joined_onto_the_base() {
        let client = ApiClient::new(&config("http://localhost:8000", None)).expect("client");
        assert_eq!(
            client.url("/api/stats").expect("url").as_str(),
            "http://localhost:8000/api/stats"
        );

        let client = ApiClient::new(&config("https://jobcenter.example/backend/", None)).expect("client");
        assert_eq!(
            client.url("/api/jobs/3/apply").expect("url").as_str(),
            "https://jobcenter.example/backend/api/jobs/3/apply"
        );
    }

    #[test]
    fn token_with_control_characters_is_rejected() {
        let err = ApiClient::new(&config("http://localhost:8000", Some("bad\ntoken"))).expect_err("token");
        assert!(matches!(err, ApiError::InvalidToken));
    }
}
