#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use leasehold_core::config::QueueConfig;
use leasehold_core::impls::InMemoryStore;
use leasehold_core::ports::ManualClock;
use leasehold_core::typed::{BoxError, CodecError, Job, decode_json, encode_json};
use leasehold_core::{App, AppBuilder};

/// Plain job; executes instantly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl Note {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ttl_ms: None,
        }
    }

    pub fn expiring_immediately(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ttl_ms: Some(0),
        }
    }
}

#[async_trait]
impl Job for Note {
    fn time_to_live(&self) -> Duration {
        self.ttl_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(60))
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        decode_json(payload)
    }

    async fn execute(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Producer side of the probed job. Workers decode it into [`Probed`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Work {
    pub sleep_ms: u64,
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub panic: bool,
}

#[async_trait]
impl Job for Work {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        decode_json(payload)
    }

    async fn execute(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Probe {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub failed: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl Probe {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

/// `Work` with the test's probe injected by the registry factory.
pub struct Probed {
    work: Work,
    probe: Arc<Probe>,
}

#[async_trait]
impl Job for Probed {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        self.work.encode()
    }

    fn decode(_payload: &[u8]) -> Result<Self, CodecError> {
        Err(CodecError::DecodingFailed(
            "Probed is built by its factory".to_string(),
        ))
    }

    async fn execute(&self) -> Result<(), BoxError> {
        self.probe.started.fetch_add(1, Ordering::SeqCst);
        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_running.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(self.work.sleep_ms)).await;

        self.probe.running.fetch_sub(1, Ordering::SeqCst);
        self.probe.finished.fetch_add(1, Ordering::SeqCst);
        if self.work.panic {
            panic!("work panicked on purpose");
        }
        if self.work.fail {
            self.probe.failed.fetch_add(1, Ordering::SeqCst);
            return Err("work failed on purpose".into());
        }
        Ok(())
    }
}

pub struct Harness {
    pub app: App,
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
    pub probe: Arc<Probe>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn harness(queue: &str) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = ManualClock::new(start_time());
    let probe = Arc::new(Probe::default());

    let factory_probe = Arc::clone(&probe);
    let app = AppBuilder::new()
        .queue(QueueConfig::new(queue))
        .clock(clock.clone())
        .register::<Note>()
        .unwrap()
        .register_factory("Work", move |payload: &[u8]| {
            let work: Work = decode_json(payload)?;
            Ok(Box::new(Probed {
                work,
                probe: Arc::clone(&factory_probe),
            }) as Box<dyn Job>)
        })
        .unwrap()
        .expect_jobs(&["Note", "Work"])
        .build(store.clone())
        .unwrap();

    Harness {
        app,
        store,
        clock,
        probe,
    }
}

/// Poll `cond` every 10ms (of tokio time) until it holds.
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..2_000 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
