//! Console notification sink - progress bars or JSON lines

use std::io::Write;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use mirror_dl::{EngineEvent, Overview};

/// Resolution of the per-slot bars
const SLOT_TICKS: u64 = 1000;

/// Human readable size with one decimal, e.g. `1.5MB`
pub fn format_bytes(size: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = size as f64;
    let mut unit = 0;
    while unit < UNITS.len() - 1 && value >= 1024.0 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}

/// Final line for a finished run
pub fn summary(failures: u64) -> String {
    if failures == 0 {
        "Mirror complete: all files downloaded and verified".to_string()
    } else {
        format!("{} failures - restart to retry", failures)
    }
}

struct Bars {
    _mp: MultiProgress,
    total: ProgressBar,
    slots: Vec<ProgressBar>,
}

pub struct Reporter {
    bars: Option<Bars>,
    total_size: u64,
    storage_failures: u64,
}

impl Reporter {
    /// `json` prints one event per line on stdout instead of drawing bars
    pub fn new(overview: &Overview, slots: usize, json: bool) -> Self {
        let bars = if json {
            None
        } else {
            let mp = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
            let total_style = ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {wide_bar} {percent}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
            let slot_style = ProgressStyle::with_template("  {bar:30} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-");

            let total = mp.add(ProgressBar::new(overview.total_size.max(1)));
            total.set_style(total_style);
            total.set_prefix(overview.name.clone());

            let slots = (0..slots.max(1))
                .map(|_| {
                    let bar = mp.add(ProgressBar::new(SLOT_TICKS));
                    bar.set_style(slot_style.clone());
                    bar
                })
                .collect();

            Some(Bars {
                _mp: mp,
                total,
                slots,
            })
        };

        Self {
            bars,
            total_size: overview.total_size,
            storage_failures: 0,
        }
    }

    pub fn storage_failures(&self) -> u64 {
        self.storage_failures
    }

    /// Render one event. Returns the failure count once the run has finished.
    pub fn handle(&mut self, event: &EngineEvent) -> Option<u64> {
        if let EngineEvent::StorageFailure { message } = event {
            self.storage_failures += 1;
            warn!("storage_failure_reported: {}", message);
        }

        match &mut self.bars {
            None => print_json(event),
            Some(bars) => render(bars, self.total_size, event),
        }

        match event {
            EngineEvent::Finished { failures } => {
                if let Some(bars) = &self.bars {
                    bars.total.finish();
                    for slot in &bars.slots {
                        slot.finish_and_clear();
                    }
                }
                Some(*failures)
            }
            _ => None,
        }
    }
}

fn print_json(event: &EngineEvent) {
    match serde_json::to_string(event) {
        Ok(line) => {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", line);
        }
        Err(e) => warn!("event_encode_failed: {}", e),
    }
}

fn render(bars: &mut Bars, total_size: u64, event: &EngineEvent) {
    match event {
        EngineEvent::SlotChanged { index, slot } => {
            if let Some(bar) = bars.slots.get(*index) {
                bar.set_position((slot.progress * SLOT_TICKS as f64) as u64);
                let state = if slot.done { "done" } else { "" };
                bar.set_message(format!(
                    "{} {} {}",
                    slot.path,
                    format_bytes(slot.bytes),
                    state
                ));
            }
        }
        EngineEvent::Progress(progress) => {
            bars.total.set_position(progress.downloaded_size);
            bars.total.set_message(format!(
                "{}/{} files, {}/{}, {} failed, {}/s",
                progress.downloaded_files,
                progress.total_files,
                format_bytes(progress.downloaded_size),
                format_bytes(total_size),
                progress.failed_files,
                format_bytes(progress.speed_bytes_per_sec as u64)
            ));
        }
        EngineEvent::ItemFailed {
            path,
            error,
            permanent: true,
        } => {
            bars.total.println(format!("failed: {} ({})", path, error));
        }
        EngineEvent::StorageFailure { message } => {
            bars.total.println(format!("storage error: {}", message));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_one_decimal() {
        assert_eq!(format_bytes(0), "0.0B");
        assert_eq!(format_bytes(1023), "1023.0B");
        assert_eq!(format_bytes(1536), "1.5KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0GB");
        assert_eq!(format_bytes(2048 * 1024 * 1024 * 1024), "2048.0GB");
    }

    #[test]
    fn summary_distinguishes_failures() {
        assert!(summary(0).contains("complete"));
        assert_eq!(summary(3), "3 failures - restart to retry");
    }

    #[test]
    fn finished_event_returns_failures() {
        let overview = Overview {
            name: "test".into(),
            total_files: 1,
            total_size: 10,
            base_url: "http://x".into(),
        };
        let mut reporter = Reporter::new(&overview, 4, true);
        assert_eq!(reporter.handle(&EngineEvent::Speed { bytes_per_sec: 1.0 }), None);
        assert_eq!(
            reporter.handle(&EngineEvent::StorageFailure {
                message: "disk".into()
            }),
            None
        );
        assert_eq!(reporter.storage_failures(), 1);
        assert_eq!(reporter.handle(&EngineEvent::Finished { failures: 2 }), Some(2));
    }
}
