//! Host whose jobs block until the test opens their gate.

#![allow(dead_code)]

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use vardispatch::{AccessSet, Host, JobFailure};

pub const STARTED_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a job must stay unstarted before a test treats it as blocked.
pub const BLOCKED_WINDOW: Duration = Duration::from_millis(150);

pub struct GatedMessage {
    pub name: &'static str,
    pub access: AccessSet,
    gate: Receiver<()>,
    pub fail: bool,
    pub panic: bool,
}

/// Opens the gate of one message.
pub struct Gate(Sender<()>);

impl Gate {
    pub fn open(&self) {
        let _ = self.0.send(());
    }
}

pub fn message(
    vars: usize,
    name: &'static str,
    reads: &[usize],
    writes: &[usize],
) -> (GatedMessage, Gate) {
    let (tx, rx) = bounded(1);
    (
        GatedMessage {
            name,
            access: AccessSet::from_indices(vars, reads, writes).unwrap(),
            gate: rx,
            fail: false,
            panic: false,
        },
        Gate(tx),
    )
}

/// A message that runs straight through.
pub fn open_message(
    vars: usize,
    name: &'static str,
    reads: &[usize],
    writes: &[usize],
) -> GatedMessage {
    let (message, gate) = message(vars, name, reads, writes);
    gate.open();
    message
}

/// State is the list of merged message names, in merge order.
pub struct GatedHost {
    started: Sender<&'static str>,
    failed: Sender<JobFailure>,
}

pub struct Observer {
    pub started: Receiver<&'static str>,
    pub failed: Receiver<JobFailure>,
}

impl Observer {
    pub fn expect_started(&self) -> &'static str {
        self.started
            .recv_timeout(STARTED_TIMEOUT)
            .expect("job should have started")
    }

    pub fn assert_nothing_starts(&self) {
        match self.started.recv_timeout(BLOCKED_WINDOW) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(name) => panic!("{name} started while it should be blocked"),
            Err(RecvTimeoutError::Disconnected) => panic!("host dropped"),
        }
    }
}

pub fn gated_host() -> (GatedHost, Observer) {
    let (started_tx, started_rx) = unbounded();
    let (failed_tx, failed_rx) = unbounded();
    (
        GatedHost {
            started: started_tx,
            failed: failed_tx,
        },
        Observer {
            started: started_rx,
            failed: failed_rx,
        },
    )
}

impl Host for GatedHost {
    type State = Vec<&'static str>;
    type Message = GatedMessage;
    type Error = String;

    fn acquire_state(&self, _current: &Vec<&'static str>) -> Vec<&'static str> {
        Vec::new()
    }

    fn merge_states(
        &self,
        mut current: Vec<&'static str>,
        result: Vec<&'static str>,
        _writes: &[bool],
    ) -> Vec<&'static str> {
        current.extend(result);
        current
    }

    fn message_vars(&self, message: &GatedMessage) -> AccessSet {
        message.access.clone()
    }

    fn process(
        &self,
        _worker: usize,
        state: &mut Vec<&'static str>,
        message: GatedMessage,
    ) -> Result<(), String> {
        let _ = self.started.send(message.name);
        let _ = message.gate.recv();
        if message.panic {
            panic!("{} exploded", message.name);
        }
        if message.fail {
            return Err(format!("{} refused", message.name));
        }
        state.push(message.name);
        Ok(())
    }

    fn job_failed(&self, failure: &JobFailure) {
        let _ = self.failed.send(failure.clone());
    }
}
