//! The mining loop.
//!
//! Candidates come from the generators, from mutations of found programs,
//! from a user-provided base program, or (in server mode) from the central
//! API. Every candidate is matched against the target sequences; accepted
//! matches are validated, stored, submitted, and mutated back into the
//! queue. Maintenance, metrics, and reloads run on fixed cadences.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::uid::Uid;
use crate::errors::SetupError;
use crate::lang::program::{OpType, Operation, Program};
use crate::lang::{comments, util};
use crate::mine::config::{ConfigLoader, MinerProfile, ValidationMode};
use crate::mine::generator::{Generator, MultiGenerator};
use crate::mine::manager::SequenceManager;
use crate::mine::matcher::SeqPrograms;
use crate::mine::mutator::Mutator;
use crate::sys::api_client::ApiClient;
use crate::sys::metrics::Metrics;
use crate::sys::progress::ProgressMonitor;
use crate::sys::setup::{self, MiningMode, Settings};
use crate::sys::{self, log};

pub const ANONYMOUS: &str = "anonymous";
const PROGRAMS_TO_FETCH: usize = 2000;
const MAX_BACKLOG: usize = 1000;
const NUM_MUTATIONS: usize = 100;

const LOG_INTERVAL: Duration = Duration::from_secs(36);
const CPU_HOUR_INTERVAL: Duration = Duration::from_secs(3600);
const RELOAD_INTERVAL: Duration = Duration::from_secs(6 * 3600);

pub const SUBMITTER_ENV: &str = "SEQMINE_SUBMITTER";

struct Scheduler {
    interval: Duration,
    last: Instant,
}

impl Scheduler {
    fn new(interval: Duration) -> Self {
        Scheduler {
            interval,
            last: Instant::now(),
        }
    }

    fn is_due(&mut self) -> bool {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

pub struct Miner {
    settings: Settings,
    profile: MinerProfile,
    mining_mode: MiningMode,
    manager: SequenceManager,
    generator: Option<MultiGenerator>,
    mutator: Mutator,
    api_client: ApiClient,
    metrics: Metrics,
    queue: VecDeque<Program>,
    base_program: Option<Program>,
    progress_monitor: Option<Arc<ProgressMonitor>>,
    num_processed: u64,
    num_found_per_user: BTreeMap<String, u64>,
    num_updated_per_user: BTreeMap<String, u64>,
    num_reported_hours: u64,
    log_scheduler: Scheduler,
    metrics_scheduler: Scheduler,
    cpu_hour_scheduler: Scheduler,
    reload_scheduler: Scheduler,
}

impl Miner {
    pub fn new(settings: Settings) -> Result<Self, SetupError> {
        let profile = ConfigLoader::load(&settings.miner_profile)?;
        let manager = SequenceManager::new(settings.clone(), profile.clone());
        let metrics = Metrics::new();
        let metrics_interval = Duration::from_secs(metrics.publish_interval.max(1));
        Ok(Miner {
            mutator: Mutator::new(&crate::mine::stats::Stats::new(), rand::random(), 0.3),
            manager,
            generator: None,
            api_client: ApiClient::new(),
            metrics,
            queue: VecDeque::new(),
            base_program: None,
            progress_monitor: None,
            num_processed: 0,
            num_found_per_user: BTreeMap::new(),
            num_updated_per_user: BTreeMap::new(),
            num_reported_hours: 0,
            log_scheduler: Scheduler::new(LOG_INTERVAL),
            metrics_scheduler: Scheduler::new(metrics_interval),
            cpu_hour_scheduler: Scheduler::new(CPU_HOUR_INTERVAL),
            reload_scheduler: Scheduler::new(RELOAD_INTERVAL),
            mining_mode: setup::mining_mode(),
            profile,
            settings,
        })
    }

    /// Mine mutations of a fixed base program instead of generated ones.
    pub fn set_base_program(&mut self, p: Program) {
        self.base_program = Some(p);
    }

    pub fn set_progress_monitor(&mut self, monitor: Arc<ProgressMonitor>) {
        self.progress_monitor = Some(monitor);
    }

    fn reload(&mut self) -> Result<(), SetupError> {
        log::debug("Loading sequences, stats, and generators");
        self.install_bfile_hooks();
        self.manager = SequenceManager::new(self.settings.clone(), self.profile.clone());
        self.manager.load()?;
        let stats = self.manager.stats()?;
        let seed: u64 = rand::random();
        let generator = if self.mining_mode == MiningMode::Server {
            None
        } else {
            let restartable = self
                .generator
                .as_ref()
                .map(|g| g.supports_restart())
                .unwrap_or(true);
            if restartable {
                Some(MultiGenerator::new(&self.profile.generators, stats, seed))
            } else {
                self.generator.take()
            }
        };
        self.mutator = Mutator::new(stats, seed.wrapping_add(1), 0.3);
        self.generator = generator;
        self.manager.release_stats();
        Ok(())
    }

    // route missing and broken curated b-files through the API client
    fn install_bfile_hooks(&self) {
        crate::seq::managed::set_bfile_fetcher(Box::new(|uid, path| {
            let client = ApiClient::new();
            let name = format!("b{:06}.txt", uid.number());
            match client.get_seq_file(&name, path) {
                Ok(()) => true,
                Err(e) => {
                    log::debug(&format!("Cannot fetch b-file for {}: {}", uid, e));
                    false
                }
            }
        }));
        crate::seq::managed::set_broken_bfile_reporter(Box::new(|uid| {
            let client = ApiClient::new();
            if let Err(e) = client.report_broken_bfile(uid) {
                log::debug(&format!("Cannot report broken b-file for {}: {}", uid, e));
            }
        }));
    }

    /// Run the mining loop until the halt flag is set, the progress target
    /// is reached, or a finite generator runs out.
    pub fn mine(&mut self) -> Result<(), SetupError> {
        self.reload()?;

        // background thread writing progress markers and eventually
        // requesting the shutdown
        let progress_thread = self.progress_monitor.clone().map(|monitor| {
            std::thread::spawn(move || {
                while !monitor.is_target_reached() && !sys::halt_requested() {
                    monitor.write_progress();
                    std::thread::sleep(LOG_INTERVAL);
                }
                monitor.write_progress();
                log::info("Initiating shutdown");
                sys::request_halt();
            })
        });

        let result = self.run_mine_loop();

        if let Some(handle) = progress_thread {
            sys::request_halt();
            if handle.join().is_err() {
                log::warn("Error joining progress monitoring thread");
            }
        }
        match &result {
            Ok(()) => log::info(&format!(
                "Finished mining after {} candidates",
                self.num_processed
            )),
            Err(e) => log::error(&format!("Mining failed: {}", e)),
        }
        result
    }

    fn run_mine_loop(&mut self) -> Result<(), SetupError> {
        if self.profile.validation == ValidationMode::Basic
            && self.mining_mode == MiningMode::Client
        {
            return Err(SetupError::InvalidConfig(
                "basic validation is not supported in client mining mode".to_string(),
            ));
        }
        loop {
            if sys::halt_requested() {
                return Ok(());
            }
            self.scheduled_tasks();

            if self.queue.is_empty() {
                self.refill_queue();
            }
            let Some(program) = self.queue.pop_front() else {
                if self.mining_mode == MiningMode::Server {
                    self.maintenance_step();
                    continue;
                }
                if self
                    .generator
                    .as_ref()
                    .map(|g| g.is_finished())
                    .unwrap_or(true)
                {
                    return Ok(()); // finite generator exhausted
                }
                continue;
            };
            self.num_processed += 1;
            self.process_candidate(program);
        }
    }

    fn refill_queue(&mut self) {
        if self.mining_mode == MiningMode::Server {
            for _ in 0..PROGRAMS_TO_FETCH {
                match self.api_client.get_next_program() {
                    Ok(Some(p)) => self.queue.push_back(p),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn(&format!("Error fetching programs: {}", e));
                        break;
                    }
                }
            }
            return;
        }
        if let Some(base) = self.base_program.clone() {
            self.mutator
                .mutate_copies(&base, NUM_MUTATIONS, &mut self.queue);
            return;
        }
        if let Some(generator) = &mut self.generator {
            for _ in 0..10 {
                if let Some(p) = generator.generate() {
                    self.queue.push_back(p);
                    break;
                }
                if generator.is_finished() {
                    break;
                }
            }
        }
    }

    fn submitter_of(program: &Program) -> String {
        comments::get_comment_field(program, comments::PREFIX_SUBMITTED_BY)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                std::env::var(SUBMITTER_ENV).unwrap_or_else(|_| ANONYMOUS.to_string())
            })
    }

    fn process_candidate(&mut self, program: Program) {
        let submitted_by = Self::submitter_of(&program);

        // a submitted program may name its target directly
        let matches: SeqPrograms = match comments::extract_sequence_id(&program) {
            Some(id) if self.manager.index.exists(id) => {
                let mut direct = program.clone();
                comments::remove_comments(&mut direct);
                vec![(id, direct)]
            }
            _ => {
                let (_norm_seq, matches) = self.manager.find_sequence(&program);
                matches
            }
        };

        for (id, candidate) in matches {
            if sys::halt_requested() {
                return;
            }
            let result = self
                .manager
                .update_program(id, &candidate, self.profile.validation);
            if !result.updated {
                continue;
            }
            let counter = if result.is_new {
                self.num_found_per_user.entry(submitted_by.clone()).or_insert(0)
            } else {
                self.num_updated_per_user
                    .entry(submitted_by.clone())
                    .or_insert(0)
            };
            *counter += 1;
            let action = if result.is_new { "Found" } else { result.change_type.as_str() };
            log::alert(
                &format!("{} program for {}", action, id),
                &format!("by {}", submitted_by),
            );

            if self.mining_mode == MiningMode::Client {
                let submission = Self::with_submission_header(&result, id, &submitted_by);
                if let Err(e) = self.api_client.post_program(&submission, MAX_BACKLOG) {
                    log::warn(&format!("Cannot submit program: {}", e));
                }
            }

            // feed mutations of the accepted program back into the queue
            self.mutator
                .mutate_copies(&result.program, NUM_MUTATIONS, &mut self.queue);
        }
    }

    // submission metadata lets the server detect collisions
    fn with_submission_header(
        result: &crate::mine::manager::UpdateResult,
        id: Uid,
        submitted_by: &str,
    ) -> Program {
        let mut p = Program::new();
        let mut header = |text: String| {
            let mut nop = Operation::nop();
            nop.comment = text;
            p.ops.push(nop);
        };
        header(id.to_string());
        header(format!("{}{}", comments::PREFIX_SUBMITTED_BY, submitted_by));
        header(format!(
            "{}{}",
            comments::PREFIX_CHANGE_TYPE,
            result.change_type
        ));
        if result.previous_hash != 0 {
            header(format!(
                "{}{}",
                comments::PREFIX_PREVIOUS_HASH,
                result.previous_hash
            ));
        }
        p.ops.extend(result.program.ops.iter().cloned());
        p.directives = result.program.directives.clone();
        p
    }

    fn maintenance_step(&mut self) {
        if let Some(id) = self.mutator.random_program_id() {
            if self.manager.maintain_program(id) {
                log::debug(&format!("Maintained program for {}", id));
            }
        }
    }

    fn scheduled_tasks(&mut self) {
        if self.log_scheduler.is_due() {
            let progress = self
                .progress_monitor
                .as_ref()
                .map(|m| format!(", {:.0}% done", m.progress() * 100.0))
                .unwrap_or_default();
            log::info(&format!(
                "Processed {} candidates ({} in queue{})",
                self.num_processed,
                self.queue.len(),
                progress
            ));
        }
        if self.metrics_scheduler.is_due() {
            let found: u64 = self.num_found_per_user.values().sum();
            let updated: u64 = self.num_updated_per_user.values().sum();
            let profile = self.profile.name.clone();
            self.metrics.write(
                "programs_found",
                &[("profile", profile.as_str())],
                found as f64,
            );
            self.metrics.write(
                "programs_updated",
                &[("profile", profile.as_str())],
                updated as f64,
            );
            self.metrics.publish();
        }
        if self.cpu_hour_scheduler.is_due() && self.mining_mode != MiningMode::Local {
            self.num_reported_hours += 1;
            if let Err(e) = self.api_client.post_cpu_hour() {
                log::warn(&format!("Cannot report cpu hour: {}", e));
            } else {
                log::debug(&format!("Reported {} cpu hours", self.num_reported_hours));
            }
        }
        if self.reload_scheduler.is_due() {
            if let Err(e) = self.reload() {
                log::error(&format!("Reload failed: {}", e));
            }
        }
    }
}

/// Run one mining process per profile and restart the ones that exit.
pub fn mine_parallel(num_instances: usize) -> Result<(), SetupError> {
    let exe = std::env::current_exe()?;
    let mut children = Vec::new();
    for i in 0..num_instances {
        children.push(spawn_instance(&exe, i)?);
    }
    log::info(&format!("Supervising {} mining processes", num_instances));
    loop {
        if sys::halt_requested() {
            for (_, child) in &mut children {
                let _ = child.kill();
            }
            return Ok(());
        }
        for (index, child) in &mut children {
            if let Ok(Some(status)) = child.try_wait() {
                log::warn(&format!(
                    "Mining process {} exited with {}; restarting",
                    index, status
                ));
                *child = spawn_instance(&exe, *index)?.1;
            }
        }
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn spawn_instance(
    exe: &std::path::Path,
    index: usize,
) -> Result<(usize, std::process::Child), SetupError> {
    let child = std::process::Command::new(exe)
        .arg("mine")
        .arg("--profile")
        .arg(index.to_string())
        .spawn()?;
    Ok((index, child))
}

/// Evaluate a candidate that names its target, used by the CLI `check`
/// command: returns the matched prefix length.
pub fn check_against(
    manager: &mut SequenceManager,
    id: Uid,
    program: &Program,
) -> Result<usize, SetupError> {
    let Some(seq) = manager.index.get_mut(id) else {
        return Err(SetupError::InvalidConfig(format!("unknown sequence {}", id)));
    };
    let terms = seq.get_terms(seq.existing_num_terms() as i64);
    let mut candidate = program.clone();
    util::remove_ops(&mut candidate, OpType::Nop);
    let (status, steps) = manager
        .finder()
        .evaluator()
        .check(&candidate, &terms, -1, id);
    match status {
        crate::eval::evaluator::Status::Error => Ok(0),
        _ => Ok(steps.runs as usize),
    }
}
