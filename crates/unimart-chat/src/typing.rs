use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

enum Input {
    Keystroke,
    Stop,
}

/// Turns raw keystrokes into typing on/off notifications.
///
/// The first keystroke reports `true`; every keystroke pushes the idle
/// deadline out; once `idle` passes without input `false` is reported even
/// if the user never signals that they stopped. Dropping the debouncer
/// cancels the pending timer.
pub struct TypingDebouncer {
    tx: mpsc::UnboundedSender<Input>,
    task: JoinHandle<()>,
}

impl TypingDebouncer {
    pub fn spawn<F>(idle: Duration, notify: F) -> Self
    where
        F: Fn(bool) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut typing = false;
            let deadline = sleep(idle);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    input = rx.recv() => match input {
                        Some(Input::Keystroke) => {
                            if !typing {
                                typing = true;
                                notify(true);
                            }
                            deadline.as_mut().reset(Instant::now() + idle);
                        }
                        Some(Input::Stop) => {
                            if typing {
                                typing = false;
                                notify(false);
                            }
                        }
                        None => break,
                    },
                    _ = &mut deadline, if typing => {
                        typing = false;
                        notify(false);
                    }
                }
            }
        });

        Self { tx, task }
    }

    pub fn keystroke(&self) {
        let _ = self.tx.send(Input::Keystroke);
    }

    /// Explicit stop (message sent, input cleared).
    pub fn stop(&self) {
        let _ = self.tx.send(Input::Stop);
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |typing| sink.lock().push(typing))
    }

    async fn settle() {
        // Let the debouncer task observe queued input.
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reverts_to_idle_after_timeout() {
        let (calls, notify) = recorder();
        let debouncer = TypingDebouncer::spawn(Duration::from_secs(3), notify);

        debouncer.keystroke();
        settle().await;
        assert_eq!(*calls.lock(), [true]);

        tokio::time::advance(Duration::from_millis(2_900)).await;
        settle().await;
        assert_eq!(*calls.lock(), [true]);

        tokio::time::advance(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(*calls.lock(), [true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_extend_the_deadline() {
        let (calls, notify) = recorder();
        let debouncer = TypingDebouncer::spawn(Duration::from_secs(3), notify);

        for _ in 0..4 {
            debouncer.keystroke();
            settle().await;
            tokio::time::advance(Duration::from_secs(2)).await;
            settle().await;
        }
        assert_eq!(*calls.lock(), [true]);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(*calls.lock(), [true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_and_drop() {
        let (calls, notify) = recorder();
        let debouncer = TypingDebouncer::spawn(Duration::from_secs(3), notify);

        debouncer.stop();
        debouncer.keystroke();
        debouncer.stop();
        settle().await;
        assert_eq!(*calls.lock(), [true, false]);

        debouncer.keystroke();
        settle().await;
        drop(debouncer);
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(*calls.lock(), [true, false, true]);
    }
}
