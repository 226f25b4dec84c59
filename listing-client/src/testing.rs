//! In-memory collaborators for controller tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use shared::types::FormFields;
use crate::directory::{DirectoryClient, Endpoint, ExchangeResult};
use crate::scheduler::{RepeatingTask, ScheduleHandle, Scheduler};

pub fn field<'a>(fields: &'a FormFields, key: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
}

/// Directory client that records every exchange and answers from a queue.
/// An empty queue answers `Ok(200)`.
pub struct ScriptedClient {
    outcomes: Mutex<VecDeque<ExchangeResult>>,
    sent: Mutex<Vec<(Endpoint, FormFields)>>,
    started: Notify,
    gate: Option<Semaphore>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            started: Notify::new(),
            gate: None,
        }
    }

    /// Every exchange stays in flight until [`ScriptedClient::release`].
    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn push(&self, outcome: ExchangeResult) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn sent(&self) -> Vec<(Endpoint, FormFields)> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until an exchange has been handed to the client.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let one held exchange complete.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl DirectoryClient for ScriptedClient {
    async fn send(&self, endpoint: Endpoint, fields: FormFields) -> ExchangeResult {
        self.sent.lock().unwrap().push((endpoint, fields));
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(200))
    }
}

struct Scheduled {
    delay: Duration,
    interval: Duration,
    task: RepeatingTask,
    handle: ScheduleHandle,
}

/// Scheduler whose ticks are fired by the test.
#[derive(Default)]
pub struct ManualScheduler {
    scheduled: Mutex<Vec<Scheduled>>,
}

impl ManualScheduler {
    /// Run every live schedule once.
    pub async fn tick(&self) {
        let live: Vec<(RepeatingTask, ScheduleHandle)> = self
            .scheduled
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.handle.is_cancelled())
            .map(|s| (s.task.clone(), s.handle.clone()))
            .collect();

        for (task, handle) in live {
            if task().await.is_break() {
                handle.cancel();
            }
        }
    }

    /// Schedules ever created.
    pub fn scheduled(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    /// Schedules not yet cancelled.
    pub fn armed(&self) -> usize {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.handle.is_cancelled())
            .count()
    }

    pub fn last_timing(&self) -> Option<(Duration, Duration)> {
        self.scheduled
            .lock()
            .unwrap()
            .last()
            .map(|s| (s.delay, s.interval))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(
        &self,
        delay: Duration,
        interval: Duration,
        task: RepeatingTask,
    ) -> ScheduleHandle {
        let handle = ScheduleHandle::new(CancellationToken::new());
        self.scheduled.lock().unwrap().push(Scheduled {
            delay,
            interval,
            task,
            handle: handle.clone(),
        });
        handle
    }
}
