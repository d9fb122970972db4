use futures::future::join_all;
use tracing::{Instrument, instrument};
use uuid::Uuid;

use crate::runner::{ChannelError, ChannelReport, ChannelRun, RunContext};
use crate::util::config::ChannelConfig;

/// Fans one [`ChannelRun`] out per configured channel and joins them.
pub struct Scheduler {
    ctx: RunContext,
}

impl Scheduler {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Runs every channel concurrently and waits for all of them; a failing channel never stops
    /// its siblings.
    #[instrument(
        skip(self, channels),
        fields(run_id = tracing::field::Empty, channel_count = channels.len())
    )]
    pub async fn run_once(&self, channels: Vec<ChannelConfig>) -> RunReport {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        tracing::debug!("starting chatters update");

        let (names, handles): (Vec<_>, Vec<_>) = channels
            .into_iter()
            .map(|channel| {
                let name = channel.streamer.clone();
                let run = ChannelRun::new(channel, self.ctx.clone());
                (name, tokio::spawn(run.run().in_current_span()))
            })
            .unzip();

        let channels = names
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(channel, joined)| match joined {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "channel task aborted");
                    ChannelReport {
                        channel,
                        outcome: Err(ChannelError::Task(e.to_string())),
                    }
                }
            })
            .collect();

        let report = RunReport { run_id, channels };
        tracing::debug!(
            succeeded = report.succeeded().count(),
            failed = report.failures().count(),
            "done updating chatters"
        );

        report
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub channels: Vec<ChannelReport>,
}

impl RunReport {
    /// `true` only when every channel succeeded.
    pub fn is_success(&self) -> bool {
        self.channels.iter().all(ChannelReport::is_success)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ChannelReport> {
        self.channels.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ChannelError)> {
        self.channels
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|e| (r.channel.as_str(), e)))
    }

    pub fn get(&self, channel: &str) -> Option<&ChannelReport> {
        self.channels.iter().find(|r| r.channel == channel)
    }

    /// Emits each diagnostic line once, at `info` for successes and `error` for failures.
    pub fn log_diagnostics(&self) {
        for (report, line) in self.channels.iter().zip(self.diagnostics()) {
            if report.is_success() {
                tracing::info!(channel = %report.channel, "{line}");
            } else {
                tracing::error!(channel = %report.channel, "{line}");
            }
        }
    }

    /// One line per channel: a user count for successes, the error kind for failures.
    pub fn diagnostics(&self) -> Vec<String> {
        self.channels
            .iter()
            .map(|r| match &r.outcome {
                Ok(summary) => format!(
                    "{}: ok, {} users updated ({} new)",
                    r.channel,
                    summary.merge.total(),
                    summary.merge.inserted
                ),
                Err(e) => format!("{}: failed [{}] {}", r.channel, e.kind(), e),
            })
            .collect()
    }
}
