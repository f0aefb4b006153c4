//! Job types understood by this binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use leasehold_core::AppBuilder;
use leasehold_core::typed::{BoxError, CodecError, Job, RegistryError, decode_json, encode_json};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct Greet {
    pub name: String,
}

#[async_trait]
impl Job for Greet {
    fn type_tag() -> &'static str {
        "greet"
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        decode_json(payload)
    }

    async fn execute(&self) -> Result<(), BoxError> {
        info!(name = %self.name, "hello");
        Ok(())
    }
}

/// Fails while the worker's shared failure budget lasts, then succeeds.
/// Its short lease lets the monitor retry it quickly.
#[derive(Debug, Serialize, Deserialize)]
pub struct Flaky {
    pub name: String,
    #[serde(skip)]
    remaining_failures: Option<Arc<AtomicU32>>,
}

impl Flaky {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remaining_failures: None,
        }
    }
}

#[async_trait]
impl Job for Flaky {
    fn type_tag() -> &'static str {
        "flaky"
    }

    fn time_to_live(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_json(self)
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        decode_json(payload)
    }

    async fn execute(&self) -> Result<(), BoxError> {
        let left = self
            .remaining_failures
            .as_ref()
            .map(|r| {
                r.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        if left > 0 {
            return Err(format!("intentional failure (left={left})").into());
        }
        info!(name = %self.name, "flaky job finally succeeded");
        Ok(())
    }
}

/// Register every job type of this binary.
pub fn register(builder: AppBuilder, flaky_failures: u32) -> Result<AppBuilder, RegistryError> {
    let remaining = Arc::new(AtomicU32::new(flaky_failures));
    builder
        .register::<Greet>()?
        .register_factory(Flaky::type_tag(), move |payload: &[u8]| {
            let mut job = Flaky::decode(payload)?;
            job.remaining_failures = Some(Arc::clone(&remaining));
            Ok(Box::new(job) as Box<dyn Job>)
        })
        .map(|builder| builder.expect_jobs(&[Greet::type_tag(), Flaky::type_tag()]))
}
