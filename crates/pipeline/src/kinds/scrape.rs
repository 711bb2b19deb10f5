//! Web page metadata scrape: fetch, parse, extract.

use std::sync::LazyLock;
use std::time::Duration;

use jobline_core::error::CoreError;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{JobError, PipelineConfig, StepReport};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; jobline-scraper/0.1)";

const FETCH_STEP: u32 = 1;
const PARSE_STEP: u32 = 2;
const EXTRACT_STEP: u32 = 3;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static META_DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s[^>]*name\s*=\s*["']description["'][^>]*>"#).expect("valid regex")
});
static CONTENT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)content\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});
static H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<h1[\s>]").expect("valid regex"));
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<a[\s>]").expect("valid regex"));
static IMG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img[\s>/]").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub url: String,
}

impl ScrapeTask {
    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|e| CoreError::Validation(format!("Invalid url {}: {e}", self.url)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(CoreError::Validation(format!(
                "Unsupported url scheme: {other}"
            ))),
        }
    }
}

/// Metadata extracted from one HTML document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSummary {
    pub title: String,
    pub description: String,
    pub h1_tags: usize,
    pub links: usize,
    pub images: usize,
}

/// Extract title, meta description and tag counts from raw HTML.
pub fn summarize_html(html: &str) -> PageSummary {
    let title = TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No Title".to_string());

    let description = META_DESCRIPTION_RE
        .find(html)
        .and_then(|tag| CONTENT_ATTR_RE.captures(tag.as_str()))
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "No description".to_string());

    PageSummary {
        title,
        description,
        h1_tags: H1_RE.find_iter(html).count(),
        links: LINK_RE.find_iter(html).count(),
        images: IMG_RE.find_iter(html).count(),
    }
}

pub struct ScrapeWorkload {
    task: ScrapeTask,
    step_delay: Duration,
    http_timeout: Duration,
    html: Option<String>,
    summary: Option<PageSummary>,
}

impl ScrapeWorkload {
    pub fn new(task: ScrapeTask, config: &PipelineConfig) -> Self {
        Self {
            task,
            step_delay: config.step_delay,
            http_timeout: config.http_timeout,
            html: None,
            summary: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.task.url
    }

    pub fn total_steps(&self) -> u32 {
        EXTRACT_STEP
    }

    pub async fn execute_step(&mut self, step: u32) -> Result<StepReport, JobError> {
        match step {
            FETCH_STEP => {
                tokio::time::sleep(self.step_delay).await;
                self.html = Some(self.fetch().await?);
                Ok(StepReport::new("Sending HTTP GET request..."))
            }
            PARSE_STEP => {
                let html = self.html.as_deref().ok_or(JobError::OutOfOrder { step })?;
                let summary = summarize_html(html);
                tokio::time::sleep(self.step_delay).await;
                self.summary = Some(summary);
                Ok(StepReport::new("Parsing HTML content..."))
            }
            EXTRACT_STEP => {
                if self.summary.is_none() {
                    return Err(JobError::OutOfOrder { step });
                }
                Ok(StepReport::new("Scrape complete successfully"))
            }
            _ => Err(JobError::OutOfOrder { step }),
        }
    }

    async fn fetch(&self) -> Result<String, JobError> {
        let client = reqwest::Client::builder()
            .timeout(self.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| JobError::Fetch(e.to_string()))?;

        let response = client
            .get(&self.task.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| JobError::Fetch(e.to_string()))?;
        tracing::debug!(url = %self.task.url, status = %response.status(), "Fetched page");

        response
            .text()
            .await
            .map_err(|e| JobError::Fetch(e.to_string()))
    }

    pub fn into_result(self) -> Result<serde_json::Value, JobError> {
        let summary = self
            .summary
            .ok_or(JobError::OutOfOrder { step: EXTRACT_STEP })?;
        Ok(serde_json::json!({
            "url": self.task.url,
            "title": summary.title,
            "description": summary.description,
            "stats": {
                "h1_tags": summary.h1_tags,
                "links": summary.links,
                "images": summary.images,
            },
        }))
    }
}
