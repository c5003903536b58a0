use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use crate::event::ReloaderEvent;

/// Emits [`ReloaderEvent::Tick`] every `every` until the receiver goes away.
///
/// Ticks missed while the event loop is busy (e.g. waiting out a slow stop)
/// are dropped rather than delivered in a burst.
pub async fn run(every: Duration, tx: mpsc::Sender<ReloaderEvent>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if tx.send(ReloaderEvent::Tick).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_ticks_until_receiver_drops() {
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::spawn(run(Duration::from_millis(5), tx));

        for _ in 0..3 {
            assert!(matches!(rx.recv().await, Some(ReloaderEvent::Tick)));
        }
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("ticker did not stop")
            .unwrap();
    }
}
