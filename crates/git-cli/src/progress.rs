use std::io::{self, Write};
use std::ops::ControlFlow;
use std::time::Instant;

use git_transfer::{CheckoutProgress, PushStatus, PushUpdate, TransferCallbacks, TransferProgress};

/// One stderr progress line in git's format:
///
/// - `Receiving objects:  50% (42/84), 1.23 MiB | 456.00 KiB/s`
/// - `Resolving deltas: 100% (12/12), done.`
pub struct Progress {
    title: &'static str,
    total: u64,
    current: u64,
    start_time: Instant,
    last_update: Instant,
    /// Minimum delay between redraws.
    delay_ms: u64,
    started: bool,
    last_percent: Option<u32>,
    throughput: Option<Throughput>,
}

struct Throughput {
    last_bytes: u64,
    last_time: Instant,
    avg_bytes: f64,
    avg_seconds: f64,
}

impl Progress {
    pub fn new(title: &'static str, total: u64) -> Self {
        let now = Instant::now();
        Self {
            title,
            total,
            current: 0,
            start_time: now,
            last_update: now,
            delay_ms: 100,
            started: false,
            last_percent: None,
            throughput: None,
        }
    }

    pub fn with_throughput(mut self) -> Self {
        self.throughput = Some(Throughput {
            last_bytes: 0,
            last_time: Instant::now(),
            avg_bytes: 0.0,
            avg_seconds: 0.0,
        });
        self
    }

    /// Feed the byte count so far into the moving average.
    pub fn bytes(&mut self, total_bytes: u64) {
        if let Some(tp) = &mut self.throughput {
            let now = Instant::now();
            let elapsed = now.duration_since(tp.last_time).as_secs_f64();
            if elapsed > 0.0 {
                let delta = total_bytes.saturating_sub(tp.last_bytes) as f64;
                tp.avg_bytes = tp.avg_bytes * 0.875 + delta * 0.125;
                tp.avg_seconds = tp.avg_seconds * 0.875 + elapsed * 0.125;
                tp.last_bytes = total_bytes;
                tp.last_time = now;
            }
        }
    }

    pub fn update(&mut self, count: u64) {
        self.current = count;
        let now = Instant::now();
        let since_last = now.duration_since(self.last_update).as_millis() as u64;
        if self.started && since_last < self.delay_ms && count < self.total {
            return;
        }
        if self.total > 0 {
            let percent = (count.saturating_mul(100) / self.total) as u32;
            if self.started && self.last_percent == Some(percent) && count < self.total {
                return;
            }
            self.last_percent = Some(percent);
        }
        self.started = true;
        self.last_update = now;
        let line = self.line();
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\r{line}");
        let _ = stderr.flush();
    }

    fn line(&self) -> String {
        let counters = if self.total > 0 {
            let percent = self.current.saturating_mul(100) / self.total;
            format!("{}: {percent:3}% ({}/{})", self.title, self.current, self.total)
        } else {
            format!("{}: {}", self.title, self.current)
        };
        match self.throughput_text() {
            Some(rate) => format!("{counters}, {rate}"),
            None => counters,
        }
    }

    fn throughput_text(&self) -> Option<String> {
        let tp = self.throughput.as_ref()?;
        if tp.avg_seconds <= 0.0 {
            return None;
        }
        let (rate, rate_unit) = human_readable_bytes(tp.avg_bytes / tp.avg_seconds);
        let (total, total_unit) = human_readable_bytes(tp.last_bytes as f64);
        Some(format!("{total:.2} {total_unit} | {rate:.2} {rate_unit}/s"))
    }

    /// Print the final line with ", done." if anything was shown.
    pub fn finish(mut self) {
        if !self.started {
            return;
        }
        self.current = self.total.max(self.current);
        let elapsed = self.start_time.elapsed();
        let timing = if elapsed.as_secs() > 0 {
            format!(", {:.2}s", elapsed.as_secs_f64())
        } else {
            String::new()
        };
        let mut stderr = io::stderr();
        let _ = writeln!(stderr, "\r{}{timing}, done.", self.line());
        let _ = stderr.flush();
    }
}

/// Bytes in git's humanised units.
fn human_readable_bytes(bytes: f64) -> (f64, &'static str) {
    const KIB: f64 = 1024.0;
    if bytes >= KIB * KIB * KIB {
        (bytes / (KIB * KIB * KIB), "GiB")
    } else if bytes >= KIB * KIB {
        (bytes / (KIB * KIB), "MiB")
    } else if bytes >= KIB {
        (bytes / KIB, "KiB")
    } else {
        (bytes, "bytes")
    }
}

/// Transfer callbacks that draw progress on stderr and relay remote
/// messages.
#[derive(Default)]
pub struct TerminalProgress {
    quiet: bool,
    receiving: Option<Progress>,
    resolving: Option<Progress>,
    checkout: Option<Progress>,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            ..Self::default()
        }
    }

    /// Close any line still open, for example after an error.
    pub fn finish(&mut self) {
        for progress in [self.receiving.take(), self.resolving.take(), self.checkout.take()]
            .into_iter()
            .flatten()
        {
            progress.finish();
        }
    }
}

impl TransferCallbacks for TerminalProgress {
    fn on_transfer(&mut self, progress: &TransferProgress) -> ControlFlow<()> {
        if self.quiet || progress.total_objects == 0 {
            return ControlFlow::Continue(());
        }
        let receiving = self
            .receiving
            .get_or_insert_with(|| Progress::new("Receiving objects", progress.total_objects.into()).with_throughput());
        receiving.bytes(progress.received_bytes);
        receiving.update(progress.received_objects.into());

        if progress.received_objects == progress.total_objects {
            if let Some(done) = self.receiving.take() {
                done.finish();
            }
            if progress.total_deltas > 0 {
                let resolving = self
                    .resolving
                    .get_or_insert_with(|| Progress::new("Resolving deltas", progress.total_deltas.into()));
                resolving.update(progress.indexed_deltas.into());
            }
        }
        if progress.is_complete() {
            if let Some(done) = self.resolving.take() {
                done.finish();
            }
        }
        ControlFlow::Continue(())
    }

    fn on_checkout(&mut self, progress: &CheckoutProgress) {
        if self.quiet {
            return;
        }
        let checkout = self
            .checkout
            .get_or_insert_with(|| Progress::new("Updating files", progress.total as u64));
        checkout.update(progress.completed as u64);
        if progress.completed == progress.total {
            if let Some(done) = self.checkout.take() {
                done.finish();
            }
        }
    }

    fn on_remote_message(&mut self, message: &str) {
        if self.quiet {
            return;
        }
        let mut stderr = io::stderr();
        for line in message.split_inclusive(|c| c == '\n' || c == '\r') {
            let _ = write!(stderr, "remote: {line}");
        }
        let _ = stderr.flush();
    }

    fn on_push_status_error(&mut self, update: &PushUpdate) {
        if let PushStatus::Rejected(reason) = &update.status {
            eprintln!(" ! [rejected]        {} ({reason})", update.name);
        }
    }
}
