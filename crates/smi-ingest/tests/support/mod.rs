//! In-memory feed and store fakes for ingester scenario tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use smi_core::{Comment, Mention, Submission};
use smi_feed::{CommentStream, FeedError, FeedSource};
use smi_store::{ItemStore, StoreError, WriteOutcome};

pub fn submission(id: &str, created: i64) -> Submission {
    Submission {
        id: id.to_string(),
        title: format!("title {id}"),
        body: format!("body {id}"),
        author: "author".to_string(),
        created,
    }
}

pub fn comment(id: &str, submission_id: &str, body: &str, created: i64) -> Comment {
    Comment {
        id: id.to_string(),
        submission_id: submission_id.to_string(),
        body: body.to_string(),
        author: "commenter".to_string(),
        created,
    }
}

#[derive(Default)]
pub struct MemState {
    pub submissions: HashMap<String, Submission>,
    pub comments: HashMap<String, Comment>,
    pub mentions: Vec<Mention>,
    pub insert_log: Vec<String>,
    pub symbols: Vec<String>,
    pub fail_insert_ids: HashSet<String>,
    pub fail_exists_ids: HashSet<String>,
}

/// `ItemStore` over a mutex-guarded map, with per-id failure injection and
/// an insert log that records commit order.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_submission(&self, submission: Submission) {
        let mut state = self.state.lock().unwrap();
        state.submissions.insert(submission.id.clone(), submission);
    }

    pub fn seed_comment(&self, comment: Comment) {
        let mut state = self.state.lock().unwrap();
        state.comments.insert(comment.id.clone(), comment);
    }

    pub fn set_symbols(&self, symbols: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.symbols = symbols.iter().map(|s| s.to_string()).collect();
    }

    pub fn fail_insert(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_insert_ids.insert(id.to_string());
    }

    pub fn fail_exists(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_exists_ids.insert(id.to_string());
    }

    pub fn insert_log(&self) -> Vec<String> {
        self.state.lock().unwrap().insert_log.clone()
    }

    pub fn submission_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .submissions
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn comment_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().unwrap().comments.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn mentions(&self) -> Vec<Mention> {
        self.state.lock().unwrap().mentions.clone()
    }
}

fn store_outage() -> StoreError {
    StoreError::Message("store unreachable".to_string())
}

#[async_trait]
impl ItemStore for MemStore {
    async fn submission_exists(&self, id: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_exists_ids.contains(id) {
            return Err(store_outage());
        }
        Ok(state.submissions.contains_key(id))
    }

    async fn comment_exists(&self, id: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_exists_ids.contains(id) {
            return Err(store_outage());
        }
        Ok(state.comments.contains_key(id))
    }

    async fn insert_submission(
        &self,
        submission: &Submission,
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_insert_ids.contains(&submission.id) {
            return Err(store_outage());
        }
        if state.submissions.contains_key(&submission.id) {
            return Ok(WriteOutcome::AlreadyPresent);
        }
        state.insert_log.push(format!("submission:{}", submission.id));
        state
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(WriteOutcome::Inserted)
    }

    async fn insert_comment(
        &self,
        comment: &Comment,
        mentions: &[Mention],
    ) -> Result<WriteOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_insert_ids.contains(&comment.id) {
            return Err(store_outage());
        }
        if state.comments.contains_key(&comment.id) {
            return Ok(WriteOutcome::AlreadyPresent);
        }
        state.insert_log.push(format!("comment:{}", comment.id));
        state.comments.insert(comment.id.clone(), comment.clone());
        state.mentions.extend_from_slice(mentions);
        Ok(WriteOutcome::Inserted)
    }

    async fn load_symbols(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state.lock().unwrap().symbols.clone())
    }
}

pub enum SubscribeOutcome {
    Fail,
    Stream(Vec<Comment>),
}

/// `FeedSource` driven by a script of subscription outcomes. Once the
/// script runs dry every further subscribe attempt fails.
pub struct ScriptedFeed {
    channel: String,
    recent: Vec<Submission>,
    submissions: Mutex<HashMap<String, Submission>>,
    script: Mutex<VecDeque<SubscribeOutcome>>,
    pub subscribe_calls: AtomicUsize,
    pub submission_fetches: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self {
            channel: "teststocks".to_string(),
            recent: Vec::new(),
            submissions: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            subscribe_calls: AtomicUsize::new(0),
            submission_fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_recent(mut self, submissions: Vec<Submission>) -> Self {
        self.recent = submissions;
        self
    }

    /// Registers a submission the feed can serve for parent lookups.
    pub fn add_submission(&self, submission: Submission) {
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.id.clone(), submission);
    }

    pub fn push_outcome(&self, outcome: SubscribeOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn submission_fetch_count(&self) -> usize {
        self.submission_fetches.load(Ordering::SeqCst)
    }
}

struct ScriptedStream {
    comments: VecDeque<Comment>,
}

#[async_trait]
impl CommentStream for ScriptedStream {
    async fn next_comment(&mut self) -> Result<Option<Comment>, FeedError> {
        Ok(self.comments.pop_front())
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn recent_submissions(&self, limit: u32) -> Result<Vec<Submission>, FeedError> {
        Ok(self
            .recent
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn submission(&self, id: &str) -> Result<Submission, FeedError> {
        self.submission_fetches.fetch_add(1, Ordering::SeqCst);
        self.submissions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| FeedError::Message(format!("unknown submission {id}")))
    }

    async fn subscribe_comments<'a>(
        &'a self,
    ) -> Result<Box<dyn CommentStream + 'a>, FeedError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(SubscribeOutcome::Stream(comments)) => Ok(Box::new(ScriptedStream {
                comments: comments.into(),
            })),
            Some(SubscribeOutcome::Fail) | None => {
                Err(FeedError::Message("scripted subscribe failure".to_string()))
            }
        }
    }
}
