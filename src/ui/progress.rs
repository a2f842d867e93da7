use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use crate::types::{ProgressObserver, ProgressPhase, ProgressSnapshot};

/// Builds progress bars and bridges scheduler snapshots onto them.
pub struct ProgressIndicator {
    colors_enabled: bool,
}

impl ProgressIndicator {
    pub fn new(colors_enabled: bool) -> Self {
        Self { colors_enabled }
    }

    pub fn create_analysis_progress(&self) -> ProgressBar {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        let template = if self.colors_enabled {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}"
        } else {
            "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}"
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }

    /// An observer that drives `bar` from progress snapshots.
    pub fn observer_for(&self, bar: ProgressBar) -> ProgressObserver {
        Arc::new(move |snapshot: &ProgressSnapshot| {
            bar.set_length(snapshot.total as u64);
            bar.set_position(snapshot.completed as u64);
            bar.set_message(progress_message(snapshot));
            if snapshot.phase == ProgressPhase::Complete {
                bar.finish_and_clear();
            }
        })
    }
}

fn progress_message(snapshot: &ProgressSnapshot) -> String {
    match snapshot.phase {
        ProgressPhase::Scanning => "scanning repository...".to_string(),
        ProgressPhase::Generating => "assembling results...".to_string(),
        ProgressPhase::Complete => "done".to_string(),
        ProgressPhase::Analyzing => {
            let mut message = if snapshot.in_flight_files.is_empty() {
                String::new()
            } else {
                let mut names = snapshot.in_flight_files.join(", ");
                if snapshot.in_flight > snapshot.in_flight_files.len() {
                    names.push_str(&format!(" +{}", snapshot.in_flight - snapshot.in_flight_files.len()));
                }
                names
            };
            if let Some(eta) = snapshot.eta {
                if !message.is_empty() {
                    message.push(' ');
                }
                message.push_str(&format!("(eta {}s)", eta.as_secs()));
            }
            message
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_message() {
        let mut snapshot = ProgressSnapshot::new(ProgressPhase::Analyzing, 2, 10);
        snapshot.in_flight_files = vec!["a.rs".to_string(), "b.rs".to_string()];
        snapshot.in_flight = 4;
        snapshot.eta = Some(Duration::from_secs(12));
        assert_eq!(progress_message(&snapshot), "a.rs, b.rs +2 (eta 12s)");

        let scanning = ProgressSnapshot::new(ProgressPhase::Scanning, 0, 0);
        assert_eq!(progress_message(&scanning), "scanning repository...");
    }

    #[test]
    fn test_observer_updates_bar() {
        let indicator = ProgressIndicator::new(false);
        let bar = ProgressBar::hidden();
        let observer = indicator.observer_for(bar.clone());
        observer(&ProgressSnapshot::new(ProgressPhase::Analyzing, 3, 7));
        assert_eq!(bar.position(), 3);
        assert_eq!(bar.length(), Some(7));
    }
}
