//! indicatif-backed progress rendering.

use std::io::{self, Write};

use bget_engine::{ProgressSink, ProgressTracker};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Shared progress surface for the whole run: one bar per in-flight
/// download/remux task, all drawn through a single `MultiProgress` so
/// concurrent updates never interleave.
pub struct IndicatifSink {
    multi: MultiProgress,
}

impl IndicatifSink {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    /// Handle for collaborators that need to draw around the bars (the log
    /// writer and the interactive prompt).
    pub fn multi(&self) -> MultiProgress {
        self.multi.clone()
    }
}

impl ProgressSink for IndicatifSink {
    fn tracker(&self, total: Option<u64>, label: &str) -> Box<dyn ProgressTracker> {
        let bar = match total {
            Some(total) => {
                let bar = self.multi.add(ProgressBar::new(total));
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} {bar:32.cyan/blue} {bytes}/{total_bytes} ({percent}%)",
                    )
                    .unwrap()
                    .progress_chars("=>-"),
                );
                bar
            }
            // Unknown content length: degrade to a plain byte counter.
            None => {
                let bar = self.multi.add(ProgressBar::no_length());
                bar.set_style(ProgressStyle::with_template("{msg} {bytes} received").unwrap());
                bar
            }
        };
        bar.set_message(label.to_string());
        Box::new(IndicatifTracker {
            multi: self.multi.clone(),
            bar,
        })
    }

    fn clear(&self) {
        let _ = self.multi.clear();
    }
}

struct IndicatifTracker {
    multi: MultiProgress,
    bar: ProgressBar,
}

impl ProgressTracker for IndicatifTracker {
    fn advance(&self, n: u64) {
        self.bar.inc(n);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        self.multi.remove(&self.bar);
    }
}

/// Routes tracing output through `MultiProgress::suspend` so log lines and
/// progress bars never mangle each other.
#[derive(Clone)]
pub struct SuspendingWriter {
    multi: MultiProgress,
}

impl SuspendingWriter {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

impl Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.multi.suspend(|| io::stderr().flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SuspendingWriter {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
