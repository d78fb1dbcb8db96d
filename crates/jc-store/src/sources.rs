use async_trait::async_trait;
use jc_core::{JobFilter, JobListing, StatSnapshot};
use std::fmt::Display;

#[async_trait]
pub trait StatsSource: Send + Sync {
    type Error: Display + Send;

    async fn current_stats(&self) -> Result<StatSnapshot, Self::Error>;
}

#[async_trait]
pub trait JobSource: Send + Sync {
    type Error: Display + Send;

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobListing>, Self::Error>;

    async fn search_jobs(&self, query: &str) -> Result<Vec<JobListing>, Self::Error>;
}
