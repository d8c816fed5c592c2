//! Pause and shutdown signals shared by the retry loop and the poller

use std::time::Duration;
use tokio::sync::watch;

/// Why a wait was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Paused,
    Shutdown,
}

/// Receiving side of the pause and shutdown flags.
///
/// Every suspension point of the lifecycle (backoff waits, poll interval)
/// goes through [`sleep`](Self::sleep) so that a pause takes effect
/// immediately instead of after the pending wait.
#[derive(Debug, Clone)]
pub struct RunControl {
    paused: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl RunControl {
    pub fn new(paused: watch::Receiver<bool>, shutdown: watch::Receiver<bool>) -> Self {
        Self { paused, shutdown }
    }

    /// Current interrupt, shutdown taking precedence
    pub fn interrupted(&self) -> Option<Interrupt> {
        if *self.shutdown.borrow() {
            Some(Interrupt::Shutdown)
        } else if *self.paused.borrow() {
            Some(Interrupt::Paused)
        } else {
            None
        }
    }

    /// Sleep for `duration` unless paused or shut down first
    pub async fn sleep(&mut self, duration: Duration) -> Result<(), Interrupt> {
        if let Some(interrupt) = self.interrupted() {
            return Err(interrupt);
        }
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        return Err(Interrupt::Shutdown);
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Err(Interrupt::Shutdown);
                    }
                }
            }
            if let Some(interrupt) = self.interrupted() {
                return Err(interrupt);
            }
        }
    }

    /// Block while paused. `Err` only on shutdown.
    pub async fn wait_resumed(&mut self) -> Result<(), Interrupt> {
        loop {
            match self.interrupted() {
                None => return Ok(()),
                Some(Interrupt::Shutdown) => return Err(Interrupt::Shutdown),
                Some(Interrupt::Paused) => {}
            }
            tokio::select! {
                changed = self.paused.changed() => {
                    if changed.is_err() {
                        return Err(Interrupt::Shutdown);
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Err(Interrupt::Shutdown);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_when_running() {
        let (_pause_tx, pause_rx) = watch::channel(false);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut control = RunControl::new(pause_rx, stop_rx);

        let start = tokio::time::Instant::now();
        control.sleep(Duration::from_secs(5)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupts_sleep() {
        let (pause_tx, pause_rx) = watch::channel(false);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut control = RunControl::new(pause_rx, stop_rx);

        let start = tokio::time::Instant::now();
        let waiter = tokio::spawn(async move { control.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        pause_tx.send_replace(true);

        assert_eq!(waiter.await.unwrap(), Err(Interrupt::Paused));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resumed() {
        let (pause_tx, pause_rx) = watch::channel(true);
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut control = RunControl::new(pause_rx, stop_rx);
        assert_eq!(control.interrupted(), Some(Interrupt::Paused));

        let mut resumed = control.clone();
        let waiter = tokio::spawn(async move { resumed.wait_resumed().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        pause_tx.send_replace(false);
        assert_eq!(waiter.await.unwrap(), Ok(()));

        stop_tx.send_replace(true);
        assert_eq!(control.wait_resumed().await, Err(Interrupt::Shutdown));
    }
}
