//! Synthetic host and workload drivers.
//!
//! [`SyntheticHost`] runs messages that only declare which variables they read and write plus
//! how long they take. A job bumps every variable it writes, so after a run each variable must
//! equal the number of successful messages that wrote it, whatever the interleaving. The host
//! also watches live accesses on the worker threads and counts any overlap the active locking
//! discipline should have prevented.
//!
//! Two drivers sit on top: [`run_batch`] submits a random batch and checks the final state,
//! [`run_periodic`] fires named generators on fixed periods until told to stop.

use crate::access::AccessSet;
use crate::error::Result;
use crate::host::{Host, JobFailure};
use crate::locking::LockingDiscipline;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::stats::StatsSnapshot;
use crate::vars::VarTable;
use rand::rngs::StdRng;
use rand::{seq::index::sample, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// One variable of the synthetic state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarRecord {
    /// Incremented once by every job writing the variable.
    pub value: u64,
    /// Id of the last message whose write was merged.
    pub last_writer: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticState {
    pub vars: Vec<VarRecord>,
}

impl SyntheticState {
    pub fn new(vars_count: usize) -> Self {
        Self {
            vars: vec![VarRecord::default(); vars_count],
        }
    }

    pub fn values(&self) -> Vec<u64> {
        self.vars.iter().map(|var| var.value).collect()
    }
}

/// A message that touches declared variables and sleeps for `process_time`.
#[derive(Debug, Clone)]
pub struct SyntheticMessage {
    pub id: u64,
    pub access: AccessSet,
    pub process_time: Duration,
    /// Makes the job report an error instead of completing.
    pub fail: bool,
}

#[derive(Debug, Error)]
#[error("message {0} failed on request")]
pub struct InjectedFailure(pub u64);

/// Host for [`SyntheticState`] / [`SyntheticMessage`].
#[derive(Debug)]
pub struct SyntheticHost {
    discipline: LockingDiscipline,
    active_readers: Vec<AtomicU32>,
    active_writers: Vec<AtomicU32>,
    reads: Vec<AtomicU64>,
    merged_writes: Vec<AtomicU64>,
    violations: AtomicU64,
    merges: AtomicU64,
    failures: AtomicU64,
}

impl SyntheticHost {
    pub fn new(discipline: LockingDiscipline, vars_count: usize) -> Self {
        Self {
            discipline,
            active_readers: (0..vars_count).map(|_| AtomicU32::new(0)).collect(),
            active_writers: (0..vars_count).map(|_| AtomicU32::new(0)).collect(),
            reads: (0..vars_count).map(|_| AtomicU64::new(0)).collect(),
            merged_writes: (0..vars_count).map(|_| AtomicU64::new(0)).collect(),
            violations: AtomicU64::new(0),
            merges: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Overlapping accesses observed on worker threads that the discipline forbids.
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    /// Reads performed per variable by jobs that completed.
    pub fn read_counts(&self) -> Vec<u64> {
        self.reads.iter().map(|n| n.load(Ordering::Relaxed)).collect()
    }

    /// Per variable, how many merges carried a write to it.
    pub fn merged_write_counts(&self) -> Vec<u64> {
        self.merged_writes
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .collect()
    }

    /// Merges reported through [`Host::state_merged`].
    pub fn merges(&self) -> u64 {
        self.merges.load(Ordering::Relaxed)
    }

    /// Failures reported through [`Host::job_failed`].
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Register live accesses and count forbidden overlaps. A read+write is a write.
    fn enter(&self, access: &AccessSet) {
        for i in 0..access.vars_count() {
            let writes = access.writes_var(i);
            let reads = access.reads_var(i) && !writes;
            let forbidden = if writes {
                let others = self.active_writers[i].fetch_add(1, Ordering::SeqCst);
                others > 0 || self.active_readers[i].load(Ordering::SeqCst) > 0
            } else if reads {
                let others = self.active_readers[i].fetch_add(1, Ordering::SeqCst);
                let writers = self.active_writers[i].load(Ordering::SeqCst) > 0;
                match self.discipline {
                    LockingDiscipline::RWLocking => writers || others > 0,
                    LockingDiscipline::WLocking => writers,
                }
            } else {
                false
            };
            if forbidden {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn leave(&self, access: &AccessSet) {
        for i in 0..access.vars_count() {
            if access.writes_var(i) {
                self.active_writers[i].fetch_sub(1, Ordering::SeqCst);
            } else if access.reads_var(i) {
                self.active_readers[i].fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl Host for SyntheticHost {
    type State = SyntheticState;
    type Message = SyntheticMessage;
    type Error = InjectedFailure;

    fn acquire_state(&self, current: &SyntheticState) -> SyntheticState {
        current.clone()
    }

    fn merge_states(
        &self,
        mut current: SyntheticState,
        result: SyntheticState,
        writes: &[bool],
    ) -> SyntheticState {
        for (i, written) in writes.iter().enumerate() {
            if *written {
                current.vars[i] = result.vars[i];
            }
        }
        current
    }

    fn message_vars(&self, message: &SyntheticMessage) -> AccessSet {
        message.access.clone()
    }

    fn process(
        &self,
        _worker: usize,
        state: &mut SyntheticState,
        message: SyntheticMessage,
    ) -> std::result::Result<(), InjectedFailure> {
        self.enter(&message.access);
        if !message.process_time.is_zero() {
            thread::sleep(message.process_time);
        }
        self.leave(&message.access);

        if message.fail {
            return Err(InjectedFailure(message.id));
        }
        for i in message.access.read_indices() {
            self.reads[i].fetch_add(1, Ordering::Relaxed);
        }
        for i in message.access.write_indices() {
            let var = &mut state.vars[i];
            var.value += 1;
            var.last_writer = Some(message.id);
        }
        Ok(())
    }

    fn state_merged(&self, _state: &SyntheticState, writes: &[bool]) {
        self.merges.fetch_add(1, Ordering::Relaxed);
        for (count, written) in self.merged_writes.iter().zip(writes) {
            if *written {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn job_failed(&self, failure: &JobFailure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        debug!(%failure, "synthetic job failed");
    }
}

/// Knobs for a random batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub vars: usize,
    pub messages: usize,
    /// Upper bound on distinct variables read per message.
    pub max_reads: usize,
    /// Upper bound on distinct variables written per message.
    pub max_writes: usize,
    pub min_process_us: u64,
    pub max_process_us: u64,
    /// Probability in `0..=1` that a message fails instead of completing.
    pub failure_rate: f64,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            vars: 16,
            messages: 1_000,
            max_reads: 3,
            max_writes: 2,
            min_process_us: 50,
            max_process_us: 500,
            failure_rate: 0.0,
            seed: 42,
        }
    }
}

/// Deterministic message source for a [`WorkloadConfig`].
pub struct MessageGenerator {
    config: WorkloadConfig,
    rng: StdRng,
    next_id: u64,
}

impl MessageGenerator {
    pub fn new(config: WorkloadConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            next_id: 0,
        }
    }

    pub fn next_message(&mut self) -> SyntheticMessage {
        let vars = self.config.vars;
        let reads = self.pick(self.config.max_reads.min(vars));
        let writes = self.pick(self.config.max_writes.min(vars));
        let mut access = AccessSet::empty(vars);
        for i in reads {
            access.mark_read(i);
        }
        for i in writes {
            access.mark_write(i);
        }

        let low = self.config.min_process_us.min(self.config.max_process_us);
        let high = self.config.max_process_us.max(low);
        let process_time = Duration::from_micros(self.rng.gen_range(low..=high));
        let fail = self.config.failure_rate > 0.0
            && self.rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0));

        let id = self.next_id;
        self.next_id += 1;
        SyntheticMessage {
            id,
            access,
            process_time,
            fail,
        }
    }

    fn pick(&mut self, max: usize) -> Vec<usize> {
        if max == 0 {
            return Vec::new();
        }
        let amount = self.rng.gen_range(0..=max);
        sample(&mut self.rng, self.config.vars, amount).into_vec()
    }
}

/// Value every variable must hold once all `messages` ran in any conflict-free order.
pub fn expected_values(vars_count: usize, messages: &[SyntheticMessage]) -> Vec<u64> {
    let mut expected = vec![0u64; vars_count];
    for message in messages.iter().filter(|m| !m.fail) {
        for i in message.access.write_indices() {
            expected[i] += 1;
        }
    }
    expected
}

/// Outcome of [`run_batch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub discipline: LockingDiscipline,
    pub workers: usize,
    pub messages: usize,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub throughput_per_sec: f64,
    pub final_values: Vec<u64>,
    pub expected_values: Vec<u64>,
    /// Final state matches the sequential expectation.
    pub consistent: bool,
    pub violations: u64,
    pub stats: StatsSnapshot,
}

/// Submit a random batch, wait for it to drain, and check the result.
pub fn run_batch(workload: &WorkloadConfig, config: SchedulerConfig) -> Result<BatchReport> {
    let vars = VarTable::flat(workload.vars);
    let host = Arc::new(SyntheticHost::new(config.discipline, workload.vars));
    let mut generator = MessageGenerator::new(workload.clone());
    let messages: Vec<SyntheticMessage> =
        (0..workload.messages).map(|_| generator.next_message()).collect();
    let expected = expected_values(workload.vars, &messages);

    let discipline = config.discipline;
    let workers = config.workers;
    let mut scheduler = Scheduler::new(
        host.clone(),
        SyntheticState::new(workload.vars),
        vars,
        config,
    )?;
    scheduler.start()?;

    let started = Instant::now();
    for message in messages {
        scheduler.schedule(message)?;
    }
    let stats_source = scheduler.submitter();
    let final_state = scheduler.stop(true)?;
    let elapsed = started.elapsed();
    let stats = stats_source.stats();

    let final_values = final_state.values();
    let consistent = final_values == expected;
    info!(
        messages = workload.messages,
        elapsed_ms = elapsed.as_millis() as u64,
        consistent,
        violations = host.violations(),
        "batch finished"
    );
    Ok(BatchReport {
        discipline,
        workers,
        messages: workload.messages,
        elapsed,
        throughput_per_sec: workload.messages as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        final_values,
        expected_values: expected,
        consistent,
        violations: host.violations(),
        stats,
    })
}

/// A named message source fired every `period_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    pub period_ms: u64,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
    #[serde(default)]
    pub process_us: u64,
}

impl Generator {
    pub fn new(name: &str, period_ms: u64, reads: &[&str], writes: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            period_ms,
            reads: reads.iter().map(|s| s.to_string()).collect(),
            writes: writes.iter().map(|s| s.to_string()).collect(),
            process_us: 0,
        }
    }

    pub fn with_process_us(mut self, process_us: u64) -> Self {
        self.process_us = process_us;
        self
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

/// Variables and generators for a periodic run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicConfig {
    pub vars: Vec<String>,
    pub generators: Vec<Generator>,
}

impl Default for PeriodicConfig {
    /// Three axis counters on independent periods plus a slower reader of the whole position.
    fn default() -> Self {
        Self {
            vars: vec![
                "pos".to_string(),
                "pos.x".to_string(),
                "pos.y".to_string(),
                "pos.z".to_string(),
            ],
            generators: vec![
                Generator::new("xInc", 2, &[], &["pos.x"]).with_process_us(200),
                Generator::new("yInc", 3, &[], &["pos.y"]).with_process_us(200),
                Generator::new("zInc", 5, &[], &["pos.z"]).with_process_us(200),
                Generator::new("snapshot", 50, &["pos"], &[]).with_process_us(1_000),
            ],
        }
    }
}

/// Per-generator submission count of a periodic run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorCount {
    pub name: String,
    pub fired: u64,
}

/// Outcome of [`run_periodic`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicReport {
    pub discipline: LockingDiscipline,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    pub generators: Vec<GeneratorCount>,
    pub final_state: Vec<(String, u64)>,
    pub violations: u64,
    pub stats: StatsSnapshot,
}

/// Longest single sleep, so a cleared `running` flag is noticed promptly.
const TICK: Duration = Duration::from_millis(50);

/// Fire every generator on its period until `duration` elapses or `running` is cleared,
/// then stop with `wait = true`.
pub fn run_periodic(
    periodic: &PeriodicConfig,
    config: SchedulerConfig,
    duration: Option<Duration>,
    running: Arc<AtomicBool>,
) -> Result<PeriodicReport> {
    let vars = VarTable::new(periodic.vars.iter().cloned())?;
    let templates = periodic
        .generators
        .iter()
        .map(|generator| {
            let reads: Vec<&str> = generator.reads.iter().map(String::as_str).collect();
            let writes: Vec<&str> = generator.writes.iter().map(String::as_str).collect();
            vars.access_set(&reads, &writes)
        })
        .collect::<Result<Vec<AccessSet>>>()?;

    let discipline = config.discipline;
    let host = Arc::new(SyntheticHost::new(discipline, vars.len()));
    let mut scheduler = Scheduler::new(
        host.clone(),
        SyntheticState::new(vars.len()),
        vars.clone(),
        config,
    )?;
    scheduler.start()?;

    let started = Instant::now();
    let deadline = duration.map(|d| started + d);
    let mut next_fire: Vec<Instant> = vec![started; periodic.generators.len()];
    let mut fired = vec![0u64; periodic.generators.len()];
    let mut next_id = 0u64;

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            break;
        }
        for (index, generator) in periodic.generators.iter().enumerate() {
            if now < next_fire[index] {
                continue;
            }
            scheduler.schedule(SyntheticMessage {
                id: next_id,
                access: templates[index].clone(),
                process_time: Duration::from_micros(generator.process_us),
                fail: false,
            })?;
            next_id += 1;
            fired[index] += 1;
            next_fire[index] += generator.period();
            // Skip missed periods instead of bursting to catch up.
            if next_fire[index] < now {
                next_fire[index] = now + generator.period();
            }
        }

        let mut wake = next_fire.iter().min().copied().unwrap_or(now + TICK);
        if let Some(deadline) = deadline {
            wake = wake.min(deadline);
        }
        let pause = wake.saturating_duration_since(Instant::now()).min(TICK);
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }

    let stats_source = scheduler.submitter();
    let final_state = scheduler.stop(true)?;
    let elapsed = started.elapsed();
    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        messages = next_id,
        "periodic run finished"
    );

    Ok(PeriodicReport {
        discipline,
        elapsed,
        generators: periodic
            .generators
            .iter()
            .zip(fired)
            .map(|(generator, fired)| GeneratorCount {
                name: generator.name.clone(),
                fired,
            })
            .collect(),
        final_state: final_state
            .vars
            .iter()
            .enumerate()
            .map(|(i, var)| (vars.name(i).unwrap_or_default().to_string(), var.value))
            .collect(),
        violations: host.violations(),
        stats: stats_source.stats(),
    })
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64() * 1_000.0)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(millis.max(0.0) / 1_000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(seed: u64) -> WorkloadConfig {
        WorkloadConfig {
            vars: 8,
            messages: 200,
            min_process_us: 0,
            max_process_us: 100,
            seed,
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn generator_is_deterministic_per_seed() {
        let mut a = MessageGenerator::new(quick(7));
        let mut b = MessageGenerator::new(quick(7));
        for _ in 0..50 {
            let (ma, mb) = (a.next_message(), b.next_message());
            assert_eq!(ma.access, mb.access);
            assert_eq!(ma.process_time, mb.process_time);
        }
    }

    #[test]
    fn generated_messages_respect_bounds() {
        let config = WorkloadConfig {
            max_reads: 2,
            max_writes: 1,
            ..quick(3)
        };
        let mut generator = MessageGenerator::new(config);
        for id in 0..200 {
            let message = generator.next_message();
            assert_eq!(message.id, id);
            assert_eq!(message.access.vars_count(), 8);
            assert!(message.access.read_indices().count() <= 2);
            assert!(message.access.write_indices().count() <= 1);
            assert!(message.process_time <= Duration::from_micros(100));
            assert!(!message.fail);
        }
    }

    #[test]
    fn expected_values_skip_failures() {
        let write0 = AccessSet::from_indices(2, &[], &[0]).unwrap();
        let messages = vec![
            SyntheticMessage {
                id: 0,
                access: write0.clone(),
                process_time: Duration::ZERO,
                fail: false,
            },
            SyntheticMessage {
                id: 1,
                access: write0,
                process_time: Duration::ZERO,
                fail: true,
            },
        ];
        assert_eq!(expected_values(2, &messages), vec![1, 0]);
    }

    #[test]
    fn merge_copies_only_written_vars() {
        let host = SyntheticHost::new(LockingDiscipline::RWLocking, 2);
        let current = SyntheticState::new(2);
        let mut result = SyntheticState::new(2);
        result.vars[0].value = 5;
        result.vars[1].value = 9;
        let merged = host.merge_states(current, result, &[false, true]);
        assert_eq!(merged.values(), vec![0, 9]);
    }

    #[test]
    fn host_flags_overlapping_writers() {
        let host = SyntheticHost::new(LockingDiscipline::WLocking, 1);
        let write = AccessSet::from_indices(1, &[], &[0]).unwrap();
        let read = AccessSet::from_indices(1, &[0], &[]).unwrap();

        host.enter(&read);
        host.enter(&read);
        assert_eq!(host.violations(), 0);
        host.enter(&write);
        assert_eq!(host.violations(), 1);
        host.leave(&write);
        host.leave(&read);
        host.leave(&read);
    }

    #[test]
    fn batch_is_consistent_under_both_disciplines() {
        for discipline in LockingDiscipline::ALL {
            let config = SchedulerConfig {
                discipline,
                workers: 4,
                ..SchedulerConfig::default()
            };
            let report = run_batch(&quick(11), config).unwrap();
            assert!(report.consistent, "{discipline}: {report:?}");
            assert_eq!(report.violations, 0);
            assert_eq!(report.stats.dispatched, 200);
        }
    }

    #[test]
    fn periodic_run_stops_at_deadline() {
        let running = Arc::new(AtomicBool::new(true));
        let report = run_periodic(
            &PeriodicConfig::default(),
            SchedulerConfig::default(),
            Some(Duration::from_millis(120)),
            running,
        )
        .unwrap();
        assert!(report.generators.iter().all(|g| g.fired > 0));
        assert_eq!(report.violations, 0);
        let x = report
            .final_state
            .iter()
            .find(|(name, _)| name == "pos.x")
            .unwrap();
        assert_eq!(x.1, report.generators[0].fired);
    }

    #[test]
    fn periodic_config_rejects_unknown_variable() {
        let config = PeriodicConfig {
            vars: vec!["a".into()],
            generators: vec![Generator::new("bad", 10, &["b"], &[])],
        };
        let err = run_periodic(
            &config,
            SchedulerConfig::default(),
            Some(Duration::from_millis(10)),
            Arc::new(AtomicBool::new(true)),
        );
        assert!(err.is_err());
    }
}
