use std::sync::Arc;
use std::time::Duration;

use crate::fetcher::{Fetcher, RefreshOutcome, Transport};

/// Calls `refresh()` every `every` for the life of the process.
/// The first tick fires immediately.
pub async fn run<T: Transport + 'static>(fetcher: Arc<Fetcher<T>>, every: Duration) {
    log::info!("poller.start interval_secs={}", every.as_secs());
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        match fetcher.refresh().await {
            RefreshOutcome::Skipped => log::debug!("poller.tick skipped=in_flight"),
            RefreshOutcome::Live { route, updated } => {
                log::debug!("poller.tick live route={} updated={}", route, updated)
            }
            RefreshOutcome::Fallback { .. } => log::debug!("poller.tick fallback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, Route};
    use crate::market::AssetId;
    use crate::state::SharedState;
    use parking_lot::Mutex;
    use serde_json::Value as JsonValue;

    struct Down {
        calls: Arc<Mutex<usize>>,
    }

    impl Transport for Down {
        async fn get_json(&self, _url: &str) -> Result<JsonValue, FetchError> {
            *self.calls.lock() += 1;
            Err(FetchError::Status(500))
        }
    }

    async fn settle(calls: &Mutex<usize>, want: usize) {
        for _ in 0..20 {
            if *calls.lock() >= want {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval() {
        let calls = Arc::new(Mutex::new(0));
        let st = SharedState::new(AssetId::Btc);
        let f = Arc::new(Fetcher::new(
            Down { calls: calls.clone() },
            vec![Route::new("r1")],
            "https://example.com/tickers".to_string(),
            st.clone(),
        ));

        let h = tokio::spawn(run(f, Duration::from_secs(60)));
        settle(&calls, 1).await;
        assert_eq!(*calls.lock(), 1);
        assert!(st.snapshot().using_fallback);

        tokio::time::advance(Duration::from_secs(61)).await;
        settle(&calls, 2).await;
        assert_eq!(*calls.lock(), 2);

        h.abort();
    }
}
