//! HTTP client for the central mining API.
//!
//! All calls are blocking; the mining loop is single-threaded and talks to
//! the API between candidates. Program submissions go through an in-process
//! backlog so that a flaky connection does not lose results.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rand::Rng;

use crate::core::uid::Uid;
use crate::lang::parser;
use crate::lang::printer;
use crate::lang::program::Program;
use crate::sys::log;

pub const BASE_URL_ENV: &str = "SEQMINE_API_URL";
const DEFAULT_BASE_URL: &str = "http://localhost:8080/miner/v1";
const FETCH_ATTEMPTS: u32 = 5;
// per-process throttle between sequence-file downloads
const MIN_FETCH_INTERVAL: Duration = Duration::from_millis(500);

pub struct ApiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    session_id: u64,
    backlog: Vec<Program>,
    last_fetch: Mutex<Option<Instant>>,
}

impl ApiClient {
    pub fn new() -> Self {
        let base_url = std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        ApiClient {
            client,
            base_url,
            session_id: rand::thread_rng().gen(),
            backlog: Vec::new(),
            last_fetch: Mutex::new(None),
        }
    }

    // sleep so that downloads never exceed the per-process rate
    fn throttle_fetch(&self) {
        let mut last = self.last_fetch.lock();
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_FETCH_INTERVAL {
                std::thread::sleep(MIN_FETCH_INTERVAL - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Fetch the next submitted program from the server queue, if any.
    pub fn get_next_program(&self) -> Result<Option<Program>> {
        let url = self.url(&format!("session/{}/programs/next", self.session_id));
        let response = self.client.get(&url).send().context("fetching program")?;
        if response.status() == reqwest::StatusCode::NO_CONTENT
            || response.status() == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(None);
        }
        let text = response
            .error_for_status()
            .context("fetching program")?
            .text()?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        match parser::parse_program(&text) {
            Ok(p) => Ok(Some(p)),
            Err(e) => {
                log::warn(&format!("Ignoring malformed fetched program: {}", e));
                Ok(None)
            }
        }
    }

    /// Queue a program for submission and flush the backlog. Programs are
    /// dropped oldest-first when the backlog limit is exceeded.
    pub fn post_program(&mut self, program: &Program, max_backlog: usize) -> Result<()> {
        self.backlog.push(program.clone());
        while self.backlog.len() > max_backlog {
            self.backlog.remove(0);
        }
        let url = self.url("programs");
        while let Some(next) = self.backlog.first().cloned() {
            let body = printer::print_program(&next);
            let result = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(body)
                .send();
            match result.and_then(|r| r.error_for_status()) {
                Ok(_) => {
                    self.backlog.remove(0);
                }
                Err(e) => {
                    log::warn(&format!(
                        "Submission failed ({} backlogged): {}",
                        self.backlog.len(),
                        e
                    ));
                    return Ok(()); // keep the backlog, retry later
                }
            }
        }
        Ok(())
    }

    pub fn backlog_size(&self) -> usize {
        self.backlog.len()
    }

    /// Report one CPU hour of mining work.
    pub fn post_cpu_hour(&self) -> Result<()> {
        let url = self.url("cpuhours");
        self.client
            .post(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .context("reporting cpu hour")?;
        Ok(())
    }

    /// Download a file from the remote sequence index, throttled and with
    /// retries.
    pub fn get_seq_file(&self, name: &str, target: &Path) -> Result<()> {
        let url = self.url(&format!("seqs/{}", name));
        let mut delay = Duration::from_secs(1);
        let mut last_error = anyhow!("no attempts made");
        for attempt in 1..=FETCH_ATTEMPTS {
            self.throttle_fetch();
            match self.try_download(&url, target) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::debug(&format!(
                        "Fetch attempt {}/{} for {} failed: {}",
                        attempt, FETCH_ATTEMPTS, name, e
                    ));
                    last_error = e;
                    std::thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
        Err(last_error.context(format!("downloading {}", name)))
    }

    fn try_download(&self, url: &str, target: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())?;
        let bytes = response.bytes()?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, &bytes)?;
        Ok(())
    }

    /// Notify the server about a corrupt b-file.
    pub fn report_broken_bfile(&self, uid: Uid) -> Result<()> {
        let url = self.url(&format!("broken/{}", uid));
        self.client
            .post(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .context("reporting broken b-file")?;
        Ok(())
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        ApiClient::new()
    }
}
