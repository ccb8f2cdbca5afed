//! Requests-per-minute limit shared by every unit task of a run.
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding window over the start times of recent provider requests.
#[derive(Debug)]
pub struct RequestThrottle {
    limit: usize,
    window: Duration,
    started: Mutex<VecDeque<Instant>>,
}

impl RequestThrottle {
    pub fn per_minute(limit: u32) -> Self {
        Self::with_window(limit, WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            started: Mutex::new(VecDeque::new()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Waits until a request may start and records it. Waiters are served in order.
    pub async fn acquire(&self) {
        let mut started = self.started.lock().await;
        loop {
            let now = Instant::now();
            while started
                .front()
                .map_or(false, |first| now.duration_since(*first) >= self.window)
            {
                started.pop_front();
            }
            if started.len() < self.limit {
                started.push_back(now);
                return;
            }
            let Some(first) = started.front().copied() else {
                continue;
            };
            let wait = self.window.saturating_sub(now.duration_since(first));
            log::info!("request limit of {} per window reached, waiting {:?}", self.limit, wait);
            tokio::time::sleep(wait).await;
        }
    }
}
