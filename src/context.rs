use crate::bitmap::{BitmapCursor, RoutingBitmap};
use crate::error::{ConfigOutcome, ReplayError, Result};
use crate::rate::SpeedMode;
use crate::sendpacket::{open_interface, Sender};
use crate::source::{FileCache, PacketSource};
use crate::structs::{Direction, Intf, StepAction, DEFAULT_MTU, MAX_SOURCES};
use crate::timing::TimerKind;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked after every send in one-at-a-time mode.
pub type ManualCallback = Box<dyn FnMut(&StatsSnapshot) -> StepAction + Send>;

/// Option set of a replay context. Immutable once `replay()` starts.
pub struct Options {
    /// Number of passes over all sources. 0 loops forever.
    pub loop_count: u32,
    pub speed: SpeedMode,
    pub timer: TimerKind,
    /// Outbound MTU ceiling in bytes.
    pub mtu: u32,
    /// Total packets to send; -1 is unlimited.
    pub limit_send: i64,
    pub enable_file_cache: bool,
    /// Pace on the original wire length instead of the captured length.
    pub use_pkthdr_len: bool,
    /// Microseconds shaved off every planned sleep.
    pub sleep_accel_us: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            loop_count: 1,
            speed: SpeedMode::default(),
            timer: TimerKind::default(),
            mtu: DEFAULT_MTU,
            limit_send: -1,
            enable_file_cache: false,
            use_pkthdr_len: false,
            sleep_accel_us: 0,
        }
    }
}

/// Cross-thread control flags. Cloned out of the context as an `Arc` so
/// another thread can abort, suspend or poll a blocked `replay()`.
///
/// All flags use relaxed atomics; the replay loop reads them once per
/// packet, which is all the ordering the control surface promises.
pub struct Control {
    abort: Arc<AtomicBool>,
    suspend: AtomicBool,
    running: AtomicBool,
}

impl Control {
    fn new() -> Self {
        Control {
            abort: Arc::new(AtomicBool::new(false)),
            suspend: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Requests a cooperative stop. The replay thread observes the flag at
    /// the next packet boundary; the same token unblocks in-progress sends.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Pauses sending after the current packet. Timing of packets sent
    /// after `restart` keeps referring to the original anchors.
    pub fn suspend(&self) {
        self.suspend.store(true, Ordering::Relaxed);
    }

    pub fn restart(&self) {
        self.suspend.store(false, Ordering::Relaxed);
    }

    /// Suspended means running but not sending.
    pub fn is_suspended(&self) -> bool {
        self.suspend.load(Ordering::Relaxed)
    }

    /// True from replay entry until it returns, even while suspended.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }

    /// Token handed to sender handles so a blocked send observes aborts.
    pub(crate) fn abort_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }
}

/// Live replay counters. Incremented only by the replay thread; any thread
/// may snapshot them. Reads are racy by design: the counters are monotone,
/// so a snapshot taken mid-update is merely a packet behind.
#[derive(Default)]
pub struct Stats {
    pkts_sent: AtomicU64,
    bytes_sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    start_time_us: AtomicU64,
    end_time_us: AtomicU64,
}

impl Stats {
    pub(crate) fn record_sent(&self, bytes: u64) {
        self.pkts_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_start(&self, now_us: u64) {
        self.start_time_us.store(now_us, Ordering::Relaxed);
        self.end_time_us.store(now_us, Ordering::Relaxed);
    }

    pub(crate) fn mark_end(&self, now_us: u64) {
        self.end_time_us.store(now_us, Ordering::Relaxed);
    }

    pub fn pkts_sent(&self) -> u64 {
        self.pkts_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Packets the bitmap routed to an unconfigured secondary interface.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pkts_sent: self.pkts_sent(),
            bytes_sent: self.bytes_sent(),
            failed: self.failed(),
            skipped: self.skipped(),
            start_time: Duration::from_micros(self.start_time_us.load(Ordering::Relaxed)),
            end_time: Duration::from_micros(self.end_time_us.load(Ordering::Relaxed)),
        }
    }
}

/// Plain copy of the counters at one instant. Start and end times are on
/// the engine's monotonic timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pkts_sent: u64,
    pub bytes_sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub start_time: Duration,
    pub end_time: Duration,
}

impl StatsSnapshot {
    pub fn elapsed(&self) -> Duration {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// A replay context: the option set, the bound sender handles, the packet
/// sources with their caches, and the control and statistics surface.
pub struct ReplayContext {
    pub(crate) opts: Options,
    pub(crate) sources: Vec<PacketSource>,
    pub(crate) file_cache: Vec<FileCache>,
    pub(crate) intf1: Option<Box<dyn Sender>>,
    pub(crate) intf2: Option<Box<dyn Sender>>,
    pub(crate) bitmap: Option<RoutingBitmap>,
    pub(crate) cursor: BitmapCursor,
    pub(crate) callback: Option<ManualCallback>,
    pub(crate) control: Arc<Control>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) current_source: usize,
    last_error: Option<ReplayError>,
    warning: Option<String>,
}

impl Default for ReplayContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayContext {
    pub fn new() -> Self {
        ReplayContext {
            opts: Options::default(),
            sources: Vec::new(),
            file_cache: Vec::new(),
            intf1: None,
            intf2: None,
            bitmap: None,
            cursor: BitmapCursor::default(),
            callback: None,
            control: Arc::new(Control::new()),
            stats: Arc::new(Stats::default()),
            current_source: 0,
            last_error: None,
            warning: None,
        }
    }

    /// Records and returns a configuration failure.
    fn fail(&mut self, err: ReplayError) -> ReplayError {
        self.last_error = Some(err.clone());
        err
    }

    pub(crate) fn record_error(&mut self, err: &ReplayError) {
        self.last_error = Some(err.clone());
    }

    pub(crate) fn set_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warning = Some(message);
    }

    /// The last configuration or replay error. Content after a successful
    /// call is undefined.
    pub fn last_error(&self) -> Option<&ReplayError> {
        self.last_error.as_ref()
    }

    /// The last error rendered to text, for callers that only want a
    /// message.
    pub fn last_error_text(&self) -> Option<String> {
        self.last_error.as_ref().map(|e| e.to_string())
    }

    /// The last warning. Content after a successful call is undefined.
    pub fn last_warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    pub fn control(&self) -> Arc<Control> {
        Arc::clone(&self.control)
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Index of the source currently being replayed.
    pub fn current_source(&self) -> usize {
        self.current_source
    }

    pub fn set_loop(&mut self, count: u32) -> Result<()> {
        if count != 1 && self.has_stream_source() {
            return Err(self.fail(ReplayError::config(
                "stream sources cannot rewind, so they require a loop count of 1",
            )));
        }
        self.opts.loop_count = count;
        Ok(())
    }

    pub fn set_speed(&mut self, speed: SpeedMode) -> Result<()> {
        if let Err(e) = speed.validate() {
            return Err(self.fail(e));
        }
        self.opts.speed = speed;
        Ok(())
    }

    pub fn set_timer(&mut self, timer: TimerKind) -> Result<()> {
        if let Err(e) = timer.ensure_available() {
            return Err(self.fail(e));
        }
        self.opts.timer = timer;
        Ok(())
    }

    pub fn set_mtu(&mut self, mtu: u32) -> Result<()> {
        if mtu == 0 {
            return Err(self.fail(ReplayError::config("MTU must be positive")));
        }
        self.opts.mtu = mtu;
        Ok(())
    }

    pub fn set_limit_send(&mut self, limit: i64) -> Result<()> {
        if limit < -1 {
            return Err(self.fail(ReplayError::config(format!(
                "send limit must be -1 (unlimited) or non-negative, got {limit}"
            ))));
        }
        self.opts.limit_send = limit;
        Ok(())
    }

    pub fn set_sleep_accel(&mut self, accel_us: u64) {
        self.opts.sleep_accel_us = accel_us;
    }

    /// Keep decoded packets in memory after the first pass. Only effective
    /// when looping; a single pass never allocates the cache.
    pub fn set_file_cache(&mut self, enable: bool) {
        self.opts.enable_file_cache = enable;
    }

    /// Pace on the original wire length instead of the captured length.
    /// Truncated captures make the two disagree, which is the point, but it
    /// also makes undersized snaplens look like full-size traffic.
    pub fn set_use_pkthdr_len(&mut self, enable: bool) -> Result<ConfigOutcome> {
        self.opts.use_pkthdr_len = enable;
        if enable {
            self.set_warning("pacing on header lengths may misbehave with truncated captures");
            return Ok(ConfigOutcome::AppliedWithWarning);
        }
        Ok(ConfigOutcome::Applied)
    }

    /// Appends a capture file to the source list.
    pub fn add_source_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.add_source(PacketSource::File(path.into()))
    }

    /// Appends a caller-supplied capture stream. Streams cannot rewind, so
    /// the context must keep a loop count of 1.
    pub fn add_source_reader(&mut self, reader: Box<dyn Read + Send>) -> Result<()> {
        if self.opts.loop_count != 1 {
            return Err(self.fail(ReplayError::config(
                "stream sources cannot rewind, so they require a loop count of 1",
            )));
        }
        self.add_source(PacketSource::Reader(Some(reader)))
    }

    fn add_source(&mut self, source: PacketSource) -> Result<()> {
        if self.sources.len() >= MAX_SOURCES {
            return Err(self.fail(ReplayError::config(format!(
                "cannot add more than {MAX_SOURCES} sources"
            ))));
        }
        if self.bitmap.is_some() && !self.sources.is_empty() {
            return Err(self.fail(ReplayError::config(
                "a classification bitmap restricts the context to a single source",
            )));
        }
        self.sources.push(source);
        self.file_cache.push(FileCache::default());
        Ok(())
    }

    fn has_stream_source(&self) -> bool {
        self.sources
            .iter()
            .any(|s| matches!(s, PacketSource::Reader(_)))
    }

    /// Opens the named interface and binds it to a sender slot.
    pub fn set_interface(&mut self, intf: Intf, name: &str) -> Result<()> {
        let direction = match intf {
            Intf::A => Direction::C2S,
            Intf::B => Direction::S2C,
        };
        let sender = match open_interface(name, direction) {
            Ok(s) => s,
            Err(e) => return Err(self.fail(e)),
        };
        self.set_sender(intf, Box::new(sender))
    }

    /// Binds an already-open sender handle to a slot. Both slots, when both
    /// bound, must report the same link-layer type.
    pub fn set_sender(&mut self, intf: Intf, mut sender: Box<dyn Sender>) -> Result<()> {
        let other = match intf {
            Intf::A => self.intf2.as_ref(),
            Intf::B => self.intf1.as_ref(),
        };
        if let Some(other) = other {
            if other.link_type() != sender.link_type() {
                return Err(self.fail(ReplayError::config(format!(
                    "link-layer type mismatch: {} is {:?} but {} is {:?}",
                    sender.name(),
                    sender.link_type(),
                    other.name(),
                    other.link_type(),
                ))));
            }
        }
        sender.set_abort_token(self.control.abort_token());
        match intf {
            Intf::A => self.intf1 = Some(sender),
            Intf::B => self.intf2 = Some(sender),
        }
        Ok(())
    }

    /// Binds the classification bitmap. Only valid with exactly one source.
    pub fn set_routing_bitmap(&mut self, bitmap: RoutingBitmap) -> Result<()> {
        if self.sources.len() > 1 {
            return Err(self.fail(ReplayError::config(
                "a classification bitmap requires exactly one source",
            )));
        }
        if !bitmap.comment().is_empty() {
            log::info!("bitmap comment: {}", bitmap.comment());
        }
        self.bitmap = Some(bitmap);
        Ok(())
    }

    /// Installs the single-step callback. Requires one-at-a-time mode.
    pub fn set_manual_callback(&mut self, callback: ManualCallback) -> Result<()> {
        if self.opts.speed != SpeedMode::Oneatatime {
            return Err(self.fail(ReplayError::config(
                "a manual callback requires the one-at-a-time speed mode",
            )));
        }
        self.callback = Some(callback);
        Ok(())
    }

    /// Releases the sender handles, the cached packets and the bitmap.
    /// Dropping the context does the same; this exists for callers that
    /// want the release to be explicit.
    pub fn close(&mut self) {
        self.intf1 = None;
        self.intf2 = None;
        self.sources.clear();
        self.file_cache.clear();
        self.bitmap = None;
        self.callback = None;
    }
}
