use crate::client::{send_with_retry, RetryPolicy};
use crate::error::{IngestError, UpstreamServiceError};
use crate::models::Document;
use chrono::Utc;
use regex::{Captures, Regex};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Turns raw HTML into readable text plus page metadata.
#[derive(Debug)]
pub struct HtmlExtractor {
    hidden: Regex,
    block_end: Regex,
    tag: Regex,
    numeric_entity: Regex,
    title: Regex,
    description: Regex,
    language: Regex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub text: String,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            hidden: Regex::new(
                r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->",
            )?,
            block_end: Regex::new(
                r"(?i)<br\s*/?>|</(?:p|div|h[1-6]|li|tr|section|article|header|footer|ul|ol|table|nav|main)\s*>",
            )?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
            numeric_entity: Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);")?,
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>")?,
            description: Regex::new(
                r#"(?is)<meta\s[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']"#,
            )?,
            language: Regex::new(r#"(?is)<html\b[^>]*\blang\s*=\s*["']([^"']+)["']"#)?,
        })
    }

    pub fn extract(&self, html: &str) -> ExtractedPage {
        let capture = |pattern: &Regex| {
            pattern
                .captures(html)
                .and_then(|captures| captures.get(1))
                .map(|found| collapse_spaces(&self.decode_entities(found.as_str())))
                .filter(|value| !value.is_empty())
        };

        let title = capture(&self.title);
        let description = capture(&self.description);
        let language = capture(&self.language);

        let visible = self.hidden.replace_all(html, "");
        let with_breaks = self.block_end.replace_all(&visible, "\n");
        let stripped = self.tag.replace_all(&with_breaks, "");
        let decoded = self.decode_entities(&stripped);

        ExtractedPage {
            title,
            description,
            language,
            text: normalize_page_text(&decoded),
        }
    }

    fn decode_entities(&self, text: &str) -> String {
        let named = text
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&rsquo;", "\u{2019}")
            .replace("&lsquo;", "\u{2018}")
            .replace("&ndash;", "\u{2013}")
            .replace("&mdash;", "\u{2014}")
            .replace("&rupee;", "\u{20b9}");

        let numeric = self
            .numeric_entity
            .replace_all(&named, |captures: &Captures| {
                let raw = &captures[1];
                let code = match raw.strip_prefix('x') {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => raw.parse::<u32>().ok(),
                };
                code.and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| captures[0].to_string())
            });

        numeric.replace("&amp;", "&")
    }
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses whitespace inside lines and keeps at most one blank line
/// between blocks of text.
pub fn normalize_page_text(text: &str) -> String {
    let mut out = String::new();
    let mut pending_break = false;

    for line in text.lines().map(collapse_spaces) {
        if line.is_empty() {
            pending_break = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if pending_break { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        pending_break = false;
    }

    out
}

#[derive(Debug, Clone)]
pub struct SkippedPage {
    pub url: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped_pages: Vec<SkippedPage>,
}

/// Fetches web pages under a requests-per-second ceiling.
pub struct WebPageLoader {
    client: Client,
    requests_per_second: f64,
    retry: RetryPolicy,
    extractor: Arc<HtmlExtractor>,
}

impl WebPageLoader {
    pub fn new(requests_per_second: f64) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("cymbal-rag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client, requests_per_second)
    }

    pub fn with_client(client: Client, requests_per_second: f64) -> Result<Self, IngestError> {
        if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
            return Err(IngestError::InvalidArgument(format!(
                "requests per second must be positive, got {requests_per_second}"
            )));
        }

        Ok(Self {
            client,
            requests_per_second,
            retry: RetryPolicy::default(),
            extractor: Arc::new(HtmlExtractor::new()?),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches every URL, skipping (and reporting) the ones that fail.
    ///
    /// Documents come back in the order of `urls`.
    pub async fn load(&self, urls: &[String]) -> Result<LoadReport, IngestError> {
        if urls.is_empty() {
            return Err(IngestError::InvalidArgument(
                "no urls to load".to_string(),
            ));
        }

        let mut ticker = tokio::time::interval(Duration::from_secs_f64(
            1.0 / self.requests_per_second,
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tasks = JoinSet::new();
        for (position, url) in urls.iter().enumerate() {
            ticker.tick().await;
            let client = self.client.clone();
            let extractor = Arc::clone(&self.extractor);
            let retry = self.retry;
            let url = url.clone();
            debug!(url = %url, "fetching page");
            tasks.spawn(async move {
                let outcome = fetch_document(&client, &retry, &extractor, &url).await;
                (position, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<Document, IngestError>>> =
            urls.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => {
                    if let Some(slot) = outcomes.get_mut(position) {
                        *slot = Some(outcome);
                    }
                }
                Err(error) => warn!(%error, "page fetch task did not complete"),
            }
        }

        let report = collect_report(urls, outcomes);
        info!(
            loaded = report.documents.len(),
            skipped = report.skipped_pages.len(),
            "website content loaded"
        );

        Ok(report)
    }
}

/// Pairs every URL with its fetch outcome, in input order. A URL with no
/// outcome lost its fetch task and is reported as skipped.
fn collect_report(
    urls: &[String],
    outcomes: Vec<Option<Result<Document, IngestError>>>,
) -> LoadReport {
    let mut documents = Vec::new();
    let mut skipped_pages = Vec::new();

    for (url, outcome) in urls.iter().zip(outcomes) {
        let reason = match outcome {
            Some(Ok(document)) => {
                documents.push(document);
                continue;
            }
            Some(Err(error)) => error.to_string(),
            None => "fetch task did not complete".to_string(),
        };
        warn!(url = %url, reason = %reason, "skipping page");
        skipped_pages.push(SkippedPage {
            url: url.clone(),
            reason,
        });
    }

    LoadReport {
        documents,
        skipped_pages,
    }
}

async fn fetch_document(
    client: &Client,
    retry: &RetryPolicy,
    extractor: &HtmlExtractor,
    url: &str,
) -> Result<Document, IngestError> {
    let response = send_with_retry(retry, "website", || client.get(url).send())
        .await
        .map_err(|error| match error {
            UpstreamServiceError::BackendResponse { status, .. } => IngestError::PageStatus {
                url: url.to_string(),
                status,
            },
            UpstreamServiceError::Http(error) => IngestError::Http(error),
            other => IngestError::Upstream(other),
        })?;

    let html = response.text().await?;
    let page = extractor.extract(&html);
    if page.text.trim().is_empty() {
        return Err(IngestError::EmptyPage(url.to_string()));
    }

    Ok(Document {
        source: url.to_string(),
        title: page.title,
        description: page.description,
        language: page.language,
        text: page.text,
        fetched_at: Utc::now(),
    })
}
