use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Delay between two evaluations when nothing else is asked for.
pub const DEFAULT_DELAY_MS: u64 = 2000;

/// Shared, adjustable delay between two demo cycles.
///
/// Clones share the same value. A new value only affects the next scheduling decision; a wait
/// that already started keeps the delay it was given.
#[derive(Debug, Clone)]
pub struct DelayControl {
    millis: Arc<AtomicU64>,
}

impl Default for DelayControl {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY_MS)
    }
}

impl DelayControl {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    /// Replace the delay. Any value is accepted, zero included.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::Relaxed);
        log::info!("{}", self.status_label());
    }

    pub fn millis(&self) -> u64 {
        self.millis.load(Ordering::Relaxed)
    }

    /// Snapshot of the current delay, used to schedule one wait.
    pub fn schedule(&self) -> Duration {
        Duration::from_millis(self.millis())
    }

    pub fn status_label(&self) -> String {
        format!(
            "Change speed of classification! Currently: {}ms",
            self.millis()
        )
    }
}

/// Apply one line of user input to the control.
///
/// Returns the new delay, or `None` when the line is not a number.
pub fn apply_input(control: &DelayControl, line: &str) -> Option<u64> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match line.parse::<u64>() {
        Ok(millis) => {
            control.set(millis);
            Some(millis)
        }
        Err(_) => {
            log::warn!("Ignoring `{line}`: type a delay in milliseconds");
            None
        }
    }
}

/// Read delays from `input`, one per line, on a background thread until it closes.
pub fn spawn_listener<R>(control: DelayControl, input: R) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("delay-control".into())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        apply_input(&control, &line);
                    }
                    Err(err) => {
                        log::warn!("Delay control stopped reading input: {err}");
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_two_seconds() {
        let control = DelayControl::default();

        assert_eq!(control.schedule(), Duration::from_millis(2000));
        assert_eq!(
            control.status_label(),
            "Change speed of classification! Currently: 2000ms"
        );
    }

    #[test]
    fn new_delay_leaves_pending_wait_untouched() {
        let control = DelayControl::default();
        let pending = control.schedule();

        control.clone().set(500);

        assert_eq!(pending, Duration::from_millis(2000));
        assert_eq!(control.schedule(), Duration::from_millis(500));
    }

    #[test]
    fn input_lines_are_parsed_without_range_checks() {
        let control = DelayControl::default();

        assert_eq!(apply_input(&control, " 0 \n"), Some(0));
        assert_eq!(control.millis(), 0);
        assert_eq!(apply_input(&control, "fast"), None);
        assert_eq!(apply_input(&control, ""), None);
        assert_eq!(control.millis(), 0);
    }

    #[test]
    fn listener_consumes_every_line() {
        let control = DelayControl::default();
        let input = std::io::Cursor::new("750\noops\n1200\n");

        spawn_listener(control.clone(), input)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(control.millis(), 1200);
    }
}
