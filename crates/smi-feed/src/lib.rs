//! Feed-source contracts + the Reddit HTTP client implementing them.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use smi_core::{Comment, Submission};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "smi-feed";

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const MAX_PAGE_SIZE: u32 = 100;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Identifier memory for the comment stream: praw-style bounded window.
const SEEN_WINDOW_CAPACITY: usize = 301;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{0}")]
    Message(String),
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("unexpected payload from {url}: {reason}")]
    Payload { url: String, reason: String },
}

/// A live subscription to new comments on a channel.
///
/// `Ok(None)` means the upstream ended the subscription; callers decide
/// whether to resubscribe. The Reddit implementation polls and never ends
/// on its own, so it only returns `Some` or an error.
#[async_trait]
pub trait CommentStream: Send {
    async fn next_comment(&mut self) -> Result<Option<Comment>, FeedError>;
}

/// The feed capability the ingester consumes: bounded recent-items pull,
/// single-item lookup for parent submissions, and a live comment feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn channel(&self) -> &str;

    /// Up to `limit` most-recent submissions, newest first. The feed may
    /// return fewer with no error.
    async fn recent_submissions(&self, limit: u32) -> Result<Vec<Submission>, FeedError>;

    async fn submission(&self, id: &str) -> Result<Submission, FeedError>;

    async fn subscribe_comments<'a>(&'a self)
        -> Result<Box<dyn CommentStream + 'a>, FeedError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Reddit API user agent: `<platform>:<app ID>:<version> (by /u/<username>)`.
pub fn script_user_agent(name: &str, version: &str, username: &str) -> String {
    format!("script:{name}:{version} (by /u/{username})")
}

#[derive(Debug, Clone)]
pub struct RedditFeedConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub channel: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl RedditFeedConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_agent: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_agent: user_agent.into(),
            channel: channel.into(),
            timeout: Duration::from_secs(20),
            poll_interval: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct BearerToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Script-auth Reddit client. One OAuth token shared across requests,
/// refreshed ahead of expiry; all listing calls go through the same
/// classify-and-backoff retry loop.
#[derive(Debug)]
pub struct RedditFeed {
    client: reqwest::Client,
    config: RedditFeedConfig,
    token: Mutex<Option<BearerToken>>,
}

impl RedditFeed {
    /// Builds the HTTP client and performs the initial token exchange so
    /// bad credentials fail at startup rather than mid-loop.
    pub async fn connect(config: RedditFeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let feed = Self {
            client,
            config,
            token: Mutex::new(None),
        };
        feed.ensure_token().await?;
        Ok(feed)
    }

    async fn ensure_token(&self) -> Result<String, FeedError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let resp = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }
        let token: TokenResponse = resp.json().await?;
        let access = token.access_token.clone();
        *guard = Some(BearerToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60)),
        });
        Ok(access)
    }

    async fn get_listing(&self, url: &str, query: &[(&str, String)]) -> Result<Listing, FeedError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.config.backoff.max_retries {
            let token = self.ensure_token().await?;
            let resp_result = self
                .client
                .get(url)
                .query(query)
                .bearer_auth(&token)
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return Ok(resp.json::<Listing>().await?);
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        // Token likely expired server-side; drop it so the
                        // next attempt re-authenticates.
                        self.token.lock().await.take();
                    }

                    let retryable = status == StatusCode::UNAUTHORIZED
                        || classify_status(status) == RetryDisposition::Retryable;
                    if retryable && attempt < self.config.backoff.max_retries {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FeedError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.config.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FeedError::Request(err));
                }
            }
        }

        Err(FeedError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }

    async fn latest_comments(&self) -> Result<Vec<Comment>, FeedError> {
        let url = format!("{OAUTH_BASE}/r/{}/comments", self.config.channel);
        let query = [
            ("limit", MAX_PAGE_SIZE.to_string()),
            ("raw_json", "1".to_string()),
        ];
        let listing = self.get_listing(&url, &query).await?;
        Ok(listing
            .data
            .children
            .into_iter()
            .filter_map(|child| {
                let id = child.data.id.clone();
                let comment = child.data.into_comment();
                if comment.is_none() {
                    debug!(id, "comment listing entry without parent link, skipped");
                }
                comment
            })
            .collect())
    }
}

#[async_trait]
impl FeedSource for RedditFeed {
    fn channel(&self) -> &str {
        &self.config.channel
    }

    async fn recent_submissions(&self, limit: u32) -> Result<Vec<Submission>, FeedError> {
        let url = format!("{OAUTH_BASE}/r/{}/new", self.config.channel);
        let mut out: Vec<Submission> = Vec::new();
        let mut after: Option<String> = None;

        while (out.len() as u32) < limit {
            let page = (limit - out.len() as u32).min(MAX_PAGE_SIZE);
            let mut query = vec![
                ("limit", page.to_string()),
                ("raw_json", "1".to_string()),
            ];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let listing = self.get_listing(&url, &query).await?;
            let next = listing.data.after;
            if listing.data.children.is_empty() {
                break;
            }
            out.extend(
                listing
                    .data
                    .children
                    .into_iter()
                    .map(|child| child.data.into_submission()),
            );

            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        out.truncate(limit as usize);
        Ok(out)
    }

    async fn submission(&self, id: &str) -> Result<Submission, FeedError> {
        let url = format!("{OAUTH_BASE}/api/info");
        let query = [
            ("id", format!("t3_{id}")),
            ("raw_json", "1".to_string()),
        ];
        let listing = self.get_listing(&url, &query).await?;
        listing
            .data
            .children
            .into_iter()
            .next()
            .map(|child| child.data.into_submission())
            .ok_or_else(|| FeedError::Payload {
                url,
                reason: format!("no submission with id {id}"),
            })
    }

    async fn subscribe_comments<'a>(
        &'a self,
    ) -> Result<Box<dyn CommentStream + 'a>, FeedError> {
        Ok(Box::new(RedditCommentStream {
            feed: self,
            seen: SeenWindow::new(SEEN_WINDOW_CAPACITY),
            pending: VecDeque::new(),
        }))
    }
}

/// Polling comment stream. Each poll fetches the channel's newest comments,
/// drops ids already in the window, and yields the remainder oldest-first.
struct RedditCommentStream<'a> {
    feed: &'a RedditFeed,
    seen: SeenWindow,
    pending: VecDeque<Comment>,
}

#[async_trait]
impl CommentStream for RedditCommentStream<'_> {
    async fn next_comment(&mut self) -> Result<Option<Comment>, FeedError> {
        loop {
            if let Some(comment) = self.pending.pop_front() {
                return Ok(Some(comment));
            }

            let batch = self.feed.latest_comments().await?;
            let mut fresh: Vec<Comment> = batch
                .into_iter()
                .filter(|c| !self.seen.contains(&c.id))
                .collect();
            // Listing order is newest-first; deliver oldest-first.
            fresh.reverse();
            for comment in &fresh {
                self.seen.insert(comment.id.clone());
            }

            if fresh.is_empty() {
                tokio::time::sleep(self.feed.config.poll_interval).await;
                continue;
            }
            self.pending.extend(fresh);
        }
    }
}

/// Bounded id memory: remembers the last `capacity` ids, evicting oldest.
#[derive(Debug)]
pub struct SeenWindow {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: String) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: ListingItem,
}

/// Union of the t3 (submission) and t1 (comment) fields we consume.
#[derive(Debug, Deserialize)]
struct ListingItem {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    created_utc: f64,
    #[serde(default)]
    link_id: Option<String>,
}

impl ListingItem {
    fn into_submission(self) -> Submission {
        Submission {
            id: self.id,
            title: self.title.unwrap_or_default(),
            body: self.selftext.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            created: self.created_utc as i64,
        }
    }

    fn into_comment(self) -> Option<Comment> {
        let link_id = self.link_id?;
        let submission_id = link_id.strip_prefix("t3_").unwrap_or(&link_id).to_string();
        Some(Comment {
            id: self.id,
            submission_id,
            body: self.body.unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            created: self.created_utc as i64,
        })
    }
}

pub const SYMBOL_DIRECTORY_URL: &str =
    "https://www.nasdaqtrader.com/dynamic/SymDir/nasdaqlisted.txt";

/// Fetches the public NASDAQ symbol directory, the fallback reference when
/// the store has no `symbols` rows.
pub async fn fetch_symbol_directory(
    user_agent: &str,
    timeout: Duration,
) -> Result<Vec<String>, FeedError> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?;
    let resp = client.get(SYMBOL_DIRECTORY_URL).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FeedError::HttpStatus {
            status: status.as_u16(),
            url: SYMBOL_DIRECTORY_URL.to_string(),
        });
    }
    let text = resp.text().await?;
    Ok(parse_symbol_directory(&text))
}

/// Parses the pipe-delimited directory: header line, one row per symbol,
/// trailing `File Creation Time` footer. Test issues are excluded.
pub fn parse_symbol_directory(text: &str) -> Vec<String> {
    text.lines()
        .skip(1)
        .filter(|line| !line.starts_with("File Creation Time"))
        .filter_map(|line| {
            let mut fields = line.split('|');
            let symbol = fields.next()?.trim();
            if symbol.is_empty() {
                return None;
            }
            let test_issue = fields.nth(2).map(str::trim);
            if test_issue == Some("Y") {
                return None;
            }
            Some(symbol.to_string())
        })
        .collect()
}
