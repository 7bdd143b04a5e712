use crate::context::ReplayContext;
use crate::error::{Outcome, ReplayError, Result};
use crate::rate::{RateController, SpeedMode};
use crate::source::CacheState;
use crate::structs::{PacketRecord, StepAction};
use crate::timing::Timer;
use std::time::Duration;

/// Sleep quantum while suspended, and the slice width used to keep the
/// control flags observable across long inter-packet gaps.
const POLL_QUANTUM: Duration = Duration::from_millis(100);
const POLL_SLICE_US: u64 = 100_000;

/// Outcome of one packet step, threaded up through the source and loop
/// iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    /// Clean end of replay: send limit reached or the callback said stop.
    Stop,
    Aborted,
}

impl ReplayContext {
    /// Replays every source in order, `loop` times, honoring the control
    /// flags. Blocks until completion or until an abort is observed.
    ///
    /// Pass `Some(idx)` to replay a single source instead of all of them.
    pub fn replay(&mut self, idx: Option<usize>) -> Result<Outcome> {
        if let Err(e) = self.validate(idx) {
            self.record_error(&e);
            return Err(e);
        }

        let timer = match Timer::new(self.opts.timer) {
            Ok(t) => t,
            Err(e) => {
                self.record_error(&e);
                return Err(e);
            }
        };

        // A single pass never allocates the cache, even when asked to.
        let cache_enabled = self.opts.enable_file_cache && self.opts.loop_count != 1;
        if self.opts.enable_file_cache && !cache_enabled {
            self.set_warning("file cache has no effect on a single pass; not caching");
        }

        log::info!(
            "replaying {} source(s) at {}, timer {}",
            self.sources.len(),
            self.opts.speed,
            timer.kind().name(),
        );

        self.stats.mark_start(timer.now_us());
        self.control.set_running(true);
        let mut rate = RateController::new(timer.now_us());

        let result = self.run_loops(idx, &timer, &mut rate, cache_enabled);

        self.stats.mark_end(timer.now_us());
        self.control.set_running(false);
        if let Err(ref e) = result {
            self.record_error(e);
        }
        result
    }

    fn validate(&self, idx: Option<usize>) -> Result<()> {
        if self.sources.is_empty() {
            return Err(ReplayError::config("no packet sources configured"));
        }
        if let Some(idx) = idx {
            if idx >= self.sources.len() {
                return Err(ReplayError::config(format!(
                    "invalid source index {idx}: only {} source(s) configured",
                    self.sources.len()
                )));
            }
        }
        if self.intf1.is_none() {
            return Err(ReplayError::config("no primary interface bound"));
        }
        if self.bitmap.is_some() && self.sources.len() != 1 {
            return Err(ReplayError::config(
                "a classification bitmap requires exactly one source",
            ));
        }
        if self.opts.speed == SpeedMode::Oneatatime && self.callback.is_none() {
            return Err(ReplayError::config(
                "one-at-a-time mode requires a manual callback",
            ));
        }
        self.opts.speed.validate()?;
        self.opts.timer.ensure_available()?;
        Ok(())
    }

    fn run_loops(
        &mut self,
        idx: Option<usize>,
        timer: &Timer,
        rate: &mut RateController,
        cache_enabled: bool,
    ) -> Result<Outcome> {
        let selected: Vec<usize> = match idx {
            Some(i) => vec![i],
            None => (0..self.sources.len()).collect(),
        };

        let mut remaining = self.opts.loop_count;
        let mut iteration = 0u64;
        loop {
            iteration += 1;
            log::debug!("pass {iteration} begins");
            for &source in &selected {
                self.current_source = source;
                self.cursor.reset();
                match self.replay_source(source, timer, rate, cache_enabled)? {
                    Step::Continue => {}
                    Step::Stop => return Ok(Outcome::Completed),
                    Step::Aborted => {
                        log::info!("replay aborted");
                        return Ok(Outcome::Aborted);
                    }
                }
            }
            if self.opts.loop_count != 0 {
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
        }
        Ok(Outcome::Completed)
    }

    /// One pass over one source, either from its memory cache or from the
    /// underlying file or stream.
    fn replay_source(
        &mut self,
        source: usize,
        timer: &Timer,
        rate: &mut RateController,
        cache_enabled: bool,
    ) -> Result<Step> {
        if cache_enabled && self.file_cache[source].is_filled() {
            log::trace!(
                "serving {} from the packet cache",
                self.sources[source].describe()
            );
            let packets = self.file_cache[source].take_packets();
            let mut outcome = Step::Continue;
            for record in &packets {
                match self.step(record, timer, rate)? {
                    Step::Continue => {}
                    other => {
                        outcome = other;
                        break;
                    }
                }
            }
            self.file_cache[source].restore(packets);
            return Ok(outcome);
        }

        let filling = cache_enabled && self.file_cache[source].state() == CacheState::Absent;
        if filling {
            self.file_cache[source].begin_fill();
        }

        let mut reader = self.sources[source].open()?;
        self.check_link_type(source, &reader);

        loop {
            let record = match reader.next_record() {
                None => break,
                Some(Err(e)) => {
                    if filling {
                        self.file_cache[source].abandon_fill();
                    }
                    return Err(e);
                }
                Some(Ok(record)) => record,
            };
            if filling {
                self.file_cache[source].push(&record);
            }
            match self.step(&record, timer, rate)? {
                Step::Continue => {}
                other => {
                    if filling {
                        // partial fills are useless, start over next time
                        self.file_cache[source].abandon_fill();
                    }
                    return Ok(other);
                }
            }
        }

        if filling {
            self.file_cache[source].finish_fill();
        }
        log::trace!("end of {}", self.sources[source].describe());
        Ok(Step::Continue)
    }

    fn check_link_type(&mut self, source: usize, reader: &crate::source::SourceReader) {
        let file_dlt = reader.link_type();
        let sender_dlt = self.intf1.as_ref().map(|s| s.link_type());
        if let Some(sender_dlt) = sender_dlt {
            if sender_dlt != file_dlt {
                let message = format!(
                    "{} is framed as {:?} but the interfaces expect {:?}",
                    self.sources[source].describe(),
                    file_dlt,
                    sender_dlt,
                );
                self.set_warning(message);
            }
        }
    }

    /// The per-packet procedure: classify, schedule, wait, dispatch,
    /// account, and honor the single-step callback and the send limit.
    fn step(
        &mut self,
        record: &PacketRecord,
        timer: &Timer,
        rate: &mut RateController,
    ) -> Result<Step> {
        if self.limit_reached() {
            return Ok(Step::Stop);
        }

        let to_secondary = match &self.bitmap {
            Some(bitmap) => self.cursor.advance(bitmap).unwrap_or(false),
            None => false,
        };

        let wire_len = record.wire_len(self.opts.use_pkthdr_len);
        let target = rate.target_us(&self.opts.speed, record.ts_us, timer.now_us());

        // Wait for the target in bounded slices so abort and suspend are
        // observed promptly even across multi-second gaps. The final slice
        // uses the configured strategy against the absolute target.
        loop {
            if self.control.aborted() {
                return Ok(Step::Aborted);
            }
            if self.control.is_suspended() {
                std::thread::sleep(POLL_QUANTUM);
                continue;
            }
            let now = timer.now_us();
            if now >= target {
                break;
            }
            if target - now > POLL_SLICE_US {
                std::thread::sleep(Duration::from_micros(POLL_SLICE_US));
            } else {
                timer.wait_until(target, self.opts.sleep_accel_us);
                break;
            }
        }

        self.dispatch(record, to_secondary, wire_len, rate);

        if self.opts.speed == SpeedMode::Oneatatime {
            let snapshot = self.stats.snapshot();
            if let Some(callback) = self.callback.as_mut() {
                if callback(&snapshot) == StepAction::Stop {
                    log::debug!("manual callback requested stop");
                    return Ok(Step::Stop);
                }
            }
        }

        if self.limit_reached() {
            log::debug!("send limit of {} reached", self.opts.limit_send);
            return Ok(Step::Stop);
        }
        Ok(Step::Continue)
    }

    fn limit_reached(&self) -> bool {
        self.opts.limit_send >= 0 && self.stats.pkts_sent() >= self.opts.limit_send as u64
    }

    /// Routes one record to a sender slot and updates the counters. Send
    /// failures and oversized packets are counted, never fatal.
    fn dispatch(
        &mut self,
        record: &PacketRecord,
        to_secondary: bool,
        wire_len: u32,
        rate: &mut RateController,
    ) {
        if wire_len > self.opts.mtu {
            log::debug!(
                "packet of {wire_len} bytes exceeds the MTU ceiling of {}",
                self.opts.mtu
            );
            self.stats.record_failed();
            return;
        }

        let sender = if to_secondary {
            match self.intf2.as_mut() {
                Some(sender) => sender,
                None => {
                    // classified for an interface that is not there
                    self.stats.record_skipped();
                    return;
                }
            }
        } else {
            match self.intf1.as_mut() {
                Some(sender) => sender,
                None => {
                    self.stats.record_failed();
                    return;
                }
            }
        };

        match sender.send(&record.data) {
            Ok(written) => {
                self.stats.record_sent(written as u64);
                rate.account_sent(wire_len);
            }
            Err(e) => {
                log::error!("failed to send packet on {}: {e}", sender.name());
                self.stats.record_failed();
            }
        }
    }
}
