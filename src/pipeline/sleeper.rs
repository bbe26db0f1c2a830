//! Suspension point between retry attempts

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Waits out the retry backoff
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real timer backed by tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested wait
///
/// # Examples
///
/// ```
/// use mathchat::pipeline::{RecordingSleeper, Sleeper};
/// use std::time::Duration;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let sleeper = RecordingSleeper::default();
/// rt.block_on(sleeper.sleep(Duration::from_secs(1)));
/// assert_eq!(sleeper.recorded(), vec![Duration::from_secs(1)]);
/// ```
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Waits requested so far, in order
    pub fn recorded(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}
