//! Terminal progress driven by session events.

use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use streamgrab_engine::{LogLevel, MergeStage, SessionEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const DOWNLOAD_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} fragments {msg}";
const MERGE_TEMPLATE: &str = "{spinner:.yellow} [{elapsed_precise}] [{bar:30.yellow/white}] {pos}% {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// Folds session events into a single progress bar.
pub struct ProgressView {
    bar: ProgressBar,
    bytes: u64,
    failed: usize,
    stage: Option<MergeStage>,
}

impl ProgressView {
    pub fn new(bar: ProgressBar) -> Self {
        bar.set_style(style(DOWNLOAD_TEMPLATE));
        Self {
            bar,
            bytes: 0,
            failed: 0,
            stage: None,
        }
    }

    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::FragmentCompleted {
                index,
                total,
                bytes,
            } => {
                self.bytes += bytes;
                if *bytes == 0 {
                    self.failed += 1;
                }
                self.bar.set_length(*total as u64);
                self.bar.set_position((*index + 1) as u64);
                let message = if self.failed > 0 {
                    format!("{} ({} failed)", HumanBytes(self.bytes), self.failed)
                } else {
                    HumanBytes(self.bytes).to_string()
                };
                self.bar.set_message(message);
            }
            SessionEvent::MergeProgress { stage, percent } => {
                if self.stage != Some(*stage) {
                    self.stage = Some(*stage);
                    self.bar.set_style(style(MERGE_TEMPLATE));
                    self.bar.set_length(100);
                    self.bar.set_message(format!("merging: {stage}"));
                }
                self.bar.set_position(percent.round() as u64);
            }
            SessionEvent::Log { level, message } => {
                if *level != LogLevel::Info {
                    self.bar.set_message(message.clone());
                }
            }
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Drain `rx` into a progress bar until every sender is gone.
pub fn spawn_reporter(mut rx: mpsc::UnboundedReceiver<SessionEvent>, hidden: bool) -> JoinHandle<()> {
    let bar = if hidden {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    };

    tokio::spawn(async move {
        let mut view = ProgressView::new(bar);
        while let Some(event) = rx.recv().await {
            view.apply(&event);
        }
        view.finish();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_fragments_and_merge_stages() {
        let mut view = ProgressView::new(ProgressBar::hidden());

        view.apply(&SessionEvent::FragmentCompleted {
            index: 0,
            total: 3,
            bytes: 1024,
        });
        view.apply(&SessionEvent::FragmentCompleted {
            index: 1,
            total: 3,
            bytes: 0,
        });
        assert_eq!(view.position(), 2);
        assert_eq!(view.bytes(), 1024);
        assert_eq!(view.failed, 1);

        view.apply(&SessionEvent::MergeProgress {
            stage: MergeStage::Concat,
            percent: 49.6,
        });
        assert_eq!(view.position(), 50);
        assert_eq!(view.stage, Some(MergeStage::Concat));
    }

    #[tokio::test]
    async fn reporter_ends_when_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_reporter(rx, true);
        tx.send(SessionEvent::Log {
            level: LogLevel::Warn,
            message: "slow origin".to_string(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
