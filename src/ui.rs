use crate::context::{Control, Stats};
use indicatif::HumanBytes;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Periodic statistics reporter. Runs until the replay stops; meant for a
/// dedicated thread next to a blocking `replay()` call.
pub fn run(stats: Arc<Stats>, control: Arc<Control>, every: Duration) {
    // the replay thread may not have started yet
    let grace = Instant::now();
    while !control.is_running() {
        if grace.elapsed() > Duration::from_secs(1) {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }

    let origin = Instant::now();
    while control.is_running() {
        thread::sleep(every);
        let snap = stats.snapshot();
        let elapsed = origin.elapsed().as_secs_f64().max(1e-6);
        let rate = (snap.bytes_sent as f64 / elapsed) as u64;
        if control.is_suspended() {
            log::info!("suspended at {} packets", snap.pkts_sent);
            continue;
        }
        log::info!(
            "{} packets ({}) sent, {}/s, {} failed, {} skipped",
            snap.pkts_sent,
            HumanBytes(snap.bytes_sent),
            HumanBytes(rate),
            snap.failed,
            snap.skipped,
        );
    }
}
