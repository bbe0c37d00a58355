//! Sweep loggers: where trial lifecycle notifications and dashboard links
//! come from.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use sl_types::{LoggerKind, Params};

/// Receives trial lifecycle notifications for one sweep.
pub trait SweepLogger: Send {
    /// Called once when the sweep is instantiated.
    fn connect(&mut self, sweep_id: &str);

    fn on_after_trial_start(&mut self, sweep_id: &str);

    fn on_after_trial_end(
        &mut self,
        sweep_id: &str,
        trial_id: usize,
        monitor: Option<&str>,
        score: f64,
        params: &Params,
    );

    /// Dashboard url for a trial, if the logger publishes one.
    fn get_url(&self, trial_id: usize) -> Option<String>;

    /// Optional dashboard layout description.
    fn configure_layout(&self) -> Option<String> {
        None
    }
}

/// Writes lifecycle notifications to `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogger {
    started: usize,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SweepLogger for TracingLogger {
    fn connect(&mut self, sweep_id: &str) {
        debug!(sweep_id = %sweep_id, "sweep logger connected");
    }

    fn on_after_trial_start(&mut self, sweep_id: &str) {
        self.started += 1;
        info!(sweep_id = %sweep_id, started = self.started, "trial started");
    }

    fn on_after_trial_end(
        &mut self,
        sweep_id: &str,
        trial_id: usize,
        monitor: Option<&str>,
        score: f64,
        params: &Params,
    ) {
        let params = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            sweep_id = %sweep_id,
            trial_id,
            monitor = monitor.unwrap_or("score"),
            score,
            params = %params,
            "trial finished"
        );
    }

    fn get_url(&self, _trial_id: usize) -> Option<String> {
        None
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentLogger;

impl SweepLogger for SilentLogger {
    fn connect(&mut self, _sweep_id: &str) {}

    fn on_after_trial_start(&mut self, _sweep_id: &str) {}

    fn on_after_trial_end(
        &mut self,
        _sweep_id: &str,
        _trial_id: usize,
        _monitor: Option<&str>,
        _score: f64,
        _params: &Params,
    ) {
    }

    fn get_url(&self, _trial_id: usize) -> Option<String> {
        None
    }
}

/// Notifications emitted by [`ChannelLogger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SweepEvent {
    Connected {
        sweep_id: String,
    },
    TrialStarted {
        sweep_id: String,
    },
    TrialEnded {
        sweep_id: String,
        trial_id: usize,
        monitor: Option<String>,
        score: f64,
        params: Params,
    },
}

/// Forwards notifications to a channel, for embedding hosts that render their
/// own dashboards.
///
/// A disconnected receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelLogger {
    tx: Sender<SweepEvent>,
    url_base: Option<String>,
}

impl ChannelLogger {
    pub fn new(tx: Sender<SweepEvent>) -> Self {
        Self { tx, url_base: None }
    }

    /// Publish `<base>/<trial_id>` as each trial's url.
    pub fn with_url(mut self, base: impl Into<String>) -> Self {
        self.url_base = Some(base.into());
        self
    }

    fn emit(&self, event: SweepEvent) {
        let _ = self.tx.send(event);
    }
}

impl SweepLogger for ChannelLogger {
    fn connect(&mut self, sweep_id: &str) {
        self.emit(SweepEvent::Connected {
            sweep_id: sweep_id.to_string(),
        });
    }

    fn on_after_trial_start(&mut self, sweep_id: &str) {
        self.emit(SweepEvent::TrialStarted {
            sweep_id: sweep_id.to_string(),
        });
    }

    fn on_after_trial_end(
        &mut self,
        sweep_id: &str,
        trial_id: usize,
        monitor: Option<&str>,
        score: f64,
        params: &Params,
    ) {
        self.emit(SweepEvent::TrialEnded {
            sweep_id: sweep_id.to_string(),
            trial_id,
            monitor: monitor.map(str::to_string),
            score,
            params: params.clone(),
        });
    }

    fn get_url(&self, trial_id: usize) -> Option<String> {
        self.url_base
            .as_ref()
            .map(|base| format!("{}/{trial_id}", base.trim_end_matches('/')))
    }
}

/// Logger for a configured [`LoggerKind`].
pub fn build_logger(kind: LoggerKind) -> Box<dyn SweepLogger> {
    match kind {
        LoggerKind::Tracing => Box::new(TracingLogger::new()),
        LoggerKind::Silent => Box::new(SilentLogger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use sl_types::ParameterValue;

    #[test]
    fn channel_logger_forwards_events() {
        let (tx, rx) = unbounded();
        let mut logger = ChannelLogger::new(tx);

        let mut params = Params::new();
        params.insert("lr".into(), ParameterValue::Float(0.01));

        logger.connect("s");
        logger.on_after_trial_start("s");
        logger.on_after_trial_end("s", 2, Some("val_acc"), 0.9, &params);

        let events: Vec<SweepEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], SweepEvent::Connected { sweep_id: "s".into() });
        match &events[2] {
            SweepEvent::TrialEnded {
                trial_id,
                monitor,
                score,
                params: sent,
                ..
            } => {
                assert_eq!(*trial_id, 2);
                assert_eq!(monitor.as_deref(), Some("val_acc"));
                assert_eq!(*score, 0.9);
                assert_eq!(sent, &params);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn channel_logger_survives_dropped_receiver() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut logger = ChannelLogger::new(tx);
        logger.on_after_trial_start("s");
    }

    #[test]
    fn urls_only_with_a_base() {
        let (tx, _rx) = unbounded();
        assert_eq!(ChannelLogger::new(tx.clone()).get_url(1), None);
        let logger = ChannelLogger::new(tx).with_url("http://dash/sweeps/s/");
        assert_eq!(logger.get_url(1).as_deref(), Some("http://dash/sweeps/s/1"));
    }

    #[test]
    fn configured_loggers_publish_no_urls() {
        assert_eq!(build_logger(LoggerKind::Tracing).get_url(0), None);
        assert_eq!(build_logger(LoggerKind::Silent).configure_layout(), None);
    }
}
