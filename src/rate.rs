use crate::error::{ReplayError, Result};
use std::fmt;

/// How fast packets leave the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedMode {
    /// Stretch real capture time by 1/k.
    Multiplier(f64),
    /// Target aggregate line rate in megabits/second. 0 means unbounded.
    Mbps(f64),
    /// Target packet rate, emitted in back-to-back bursts of `burst`
    /// packets before pacing.
    Pps { rate: f64, burst: u32 },
    /// No pacing at all.
    Topspeed,
    /// Each send is gated by the installed single-step callback.
    Oneatatime,
}

impl Default for SpeedMode {
    fn default() -> Self {
        SpeedMode::Multiplier(1.0)
    }
}

impl fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedMode::Multiplier(k) => write!(f, "multiplier x{k}"),
            SpeedMode::Mbps(r) if *r == 0.0 => write!(f, "unbounded"),
            SpeedMode::Mbps(r) => write!(f, "{r} Mbps"),
            SpeedMode::Pps { rate, burst } => write!(f, "{rate} pps (burst {burst})"),
            SpeedMode::Topspeed => write!(f, "topspeed"),
            SpeedMode::Oneatatime => write!(f, "one at a time"),
        }
    }
}

impl SpeedMode {
    pub fn validate(&self) -> Result<()> {
        match self {
            SpeedMode::Multiplier(k) if !(k.is_finite() && *k > 0.0) => Err(ReplayError::config(
                format!("speed multiplier must be positive, got {k}"),
            )),
            SpeedMode::Mbps(r) if !(r.is_finite() && *r >= 0.0) => Err(ReplayError::config(
                format!("Mbps rate must be zero or positive, got {r}"),
            )),
            SpeedMode::Pps { rate, .. } if !(rate.is_finite() && *rate > 0.0) => Err(
                ReplayError::config(format!("packet rate must be positive, got {rate}")),
            ),
            SpeedMode::Pps { burst: 0, .. } => {
                Err(ReplayError::config("packet burst must be at least 1"))
            }
            _ => Ok(()),
        }
    }
}

/// Computes the absolute send target for each packet.
///
/// Anchored once per replay invocation: `mono_start` at entry, `cap_start`
/// on the first packet seen. All targets derive from these anchors, never
/// from accumulated sleeps, so wake-up error cannot drift.
#[derive(Debug)]
pub struct RateController {
    mono_start_us: u64,
    cap_start_us: Option<i64>,
    last_cap_us: i64,
    /// Bytes already sent, for the Mbps formula.
    bytes_sent: u64,
    /// Packets already sent, for burst bookkeeping.
    pkts_sent: u64,
    /// Absolute target of the current pps burst.
    burst_target_us: u64,
}

impl RateController {
    pub fn new(mono_start_us: u64) -> Self {
        RateController {
            mono_start_us,
            cap_start_us: None,
            last_cap_us: i64::MIN,
            bytes_sent: 0,
            pkts_sent: 0,
            burst_target_us: mono_start_us,
        }
    }

    /// Absolute send target for the next packet.
    ///
    /// A capture timestamp lower than its predecessor is deliberately
    /// treated as equal to it, so replay time never runs backward even for
    /// capture files with rewound clocks.
    pub fn target_us(&mut self, mode: &SpeedMode, cap_us: i64, now_us: u64) -> u64 {
        let cap_us = cap_us.max(self.last_cap_us);
        self.last_cap_us = cap_us;
        let cap_start = *self.cap_start_us.get_or_insert(cap_us);

        match mode {
            SpeedMode::Multiplier(k) => {
                let offset_us = ((cap_us - cap_start) as f64 / k) as u64;
                self.mono_start_us + offset_us
            }
            SpeedMode::Mbps(rate) if *rate > 0.0 => {
                // 8*B bits at r Mbit/s take 8*B/r microseconds.
                let offset_us = (self.bytes_sent as f64 * 8.0 / rate) as u64;
                self.mono_start_us + offset_us
            }
            SpeedMode::Mbps(_) => now_us,
            SpeedMode::Pps { rate, burst } => {
                let burst = (*burst).max(1) as u64;
                if self.pkts_sent == 0 {
                    self.burst_target_us
                } else if self.pkts_sent % burst == 0 {
                    self.burst_target_us += (burst as f64 * 1e6 / rate) as u64;
                    self.burst_target_us
                } else {
                    now_us
                }
            }
            SpeedMode::Topspeed | SpeedMode::Oneatatime => now_us,
        }
    }

    /// Records a successful send for the running rate counters.
    pub fn account_sent(&mut self, wire_len: u32) {
        self.bytes_sent += wire_len as u64;
        self.pkts_sent += 1;
    }
}
