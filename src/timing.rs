use crate::error::{ReplayError, Result};
use std::time::{Duration, Instant};

/// Strategy used to wait for a packet's send target.
///
/// Jitter floors differ per strategy: the spinning strategies (`Gtod`,
/// `Rdtsc`) stay within a few microseconds of the target, the sleeping ones
/// (`Nanosleep`, `Select`, `AbsTime`) are at the mercy of the scheduler
/// (tens of microseconds to a few hundred, depending on load), and `Ioport`
/// is calibrated to roughly one microsecond per port read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Platform-native absolute deadline sleep (`clock_nanosleep` with
    /// `TIMER_ABSTIME`). Linux only.
    AbsTime,
    /// Tight loop over the monotonic clock.
    Gtod,
    /// Relative sleep of the computed delta.
    Nanosleep,
    /// `select(2)` on an empty descriptor set with a timeout. Unix only.
    Select,
    /// Spin on the cycle counter; calibrated at timer creation. x86_64 only.
    Rdtsc,
    /// Calibrated reads of I/O port 0x80. 32-bit x86 Linux only, and needs
    /// `ioperm` privileges.
    Ioport,
}

impl Default for TimerKind {
    fn default() -> Self {
        if cfg!(target_os = "linux") {
            TimerKind::AbsTime
        } else {
            TimerKind::Gtod
        }
    }
}

impl TimerKind {
    pub fn name(self) -> &'static str {
        match self {
            TimerKind::AbsTime => "abstime",
            TimerKind::Gtod => "gtod",
            TimerKind::Nanosleep => "nano",
            TimerKind::Select => "select",
            TimerKind::Rdtsc => "rdtsc",
            TimerKind::Ioport => "ioport",
        }
    }

    /// Rejects strategies the current platform cannot realize.
    pub fn ensure_available(self) -> Result<()> {
        let available = match self {
            TimerKind::Gtod | TimerKind::Nanosleep => true,
            TimerKind::Select => cfg!(unix),
            TimerKind::AbsTime => cfg!(target_os = "linux"),
            TimerKind::Rdtsc => cfg!(target_arch = "x86_64"),
            TimerKind::Ioport => cfg!(all(target_os = "linux", target_arch = "x86")),
        };
        if available {
            Ok(())
        } else {
            Err(ReplayError::PlatformUnavailable {
                strategy: self.name(),
            })
        }
    }
}

/// Monotonic microsecond clock plus the configured wait strategy.
///
/// All send targets are expressed on this timeline, anchored at timer
/// creation. Targets are always absolute so that per-packet wake-up error
/// never accumulates.
pub struct Timer {
    kind: TimerKind,
    origin: Instant,
    /// Cycles per microsecond; calibrated only for `Rdtsc`.
    tsc_per_us: u64,
}

impl Timer {
    pub fn new(kind: TimerKind) -> Result<Timer> {
        kind.ensure_available()?;

        #[cfg(all(target_os = "linux", target_arch = "x86"))]
        if kind == TimerKind::Ioport {
            init_ioport()?;
        }

        let tsc_per_us = if kind == TimerKind::Rdtsc {
            calibrate_tsc()
        } else {
            0
        };

        Ok(Timer {
            kind,
            origin: Instant::now(),
            tsc_per_us,
        })
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Microseconds elapsed on the monotonic timeline.
    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Blocks until the monotonic clock reaches `target_us`.
    ///
    /// `accel_us` is subtracted from the planned wait, not from the target:
    /// the call may return up to `accel_us` early to compensate scheduling
    /// tail latency, and the caller's next target is still computed from the
    /// absolute anchors. A target at or before now is a no-op.
    pub fn wait_until(&self, target_us: u64, accel_us: u64) {
        let goal = target_us.saturating_sub(accel_us);
        let now = self.now_us();
        if goal <= now {
            return;
        }
        let delta = goal - now;

        match self.kind {
            TimerKind::Nanosleep => std::thread::sleep(Duration::from_micros(delta)),
            TimerKind::Gtod => {
                while self.now_us() < goal {
                    std::hint::spin_loop();
                }
            }
            TimerKind::Select => select_sleep(delta),
            TimerKind::AbsTime => abs_sleep(delta),
            TimerKind::Rdtsc => self.rdtsc_wait(delta),
            TimerKind::Ioport => ioport_wait(delta),
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn rdtsc_wait(&self, delta_us: u64) {
        let end =
            unsafe { std::arch::x86_64::_rdtsc() } + delta_us.saturating_mul(self.tsc_per_us);
        while unsafe { std::arch::x86_64::_rdtsc() } < end {
            std::hint::spin_loop();
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn rdtsc_wait(&self, delta_us: u64) {
        // Unreachable: the strategy is rejected at configuration time.
        std::thread::sleep(Duration::from_micros(delta_us));
    }
}

/// Measures the cycle counter against the monotonic clock.
#[cfg(target_arch = "x86_64")]
fn calibrate_tsc() -> u64 {
    let wall = Instant::now();
    let t0 = unsafe { std::arch::x86_64::_rdtsc() };
    std::thread::sleep(Duration::from_millis(20));
    let t1 = unsafe { std::arch::x86_64::_rdtsc() };
    let elapsed_us = (wall.elapsed().as_micros() as u64).max(1);
    (t1.saturating_sub(t0) / elapsed_us).max(1)
}

#[cfg(not(target_arch = "x86_64"))]
fn calibrate_tsc() -> u64 {
    1
}

#[cfg(unix)]
fn select_sleep(delta_us: u64) {
    let mut tv = libc::timeval {
        tv_sec: (delta_us / 1_000_000) as libc::time_t,
        tv_usec: (delta_us % 1_000_000) as libc::suseconds_t,
    };
    unsafe {
        libc::select(
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut tv,
        );
    }
}

#[cfg(not(unix))]
fn select_sleep(delta_us: u64) {
    std::thread::sleep(Duration::from_micros(delta_us));
}

#[cfg(target_os = "linux")]
fn abs_sleep(delta_us: u64) {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now);
    }
    let total_ns = now.tv_nsec as i64 + (delta_us % 1_000_000) as i64 * 1_000;
    let deadline = libc::timespec {
        tv_sec: now.tv_sec + (delta_us / 1_000_000) as libc::time_t
            + (total_ns / 1_000_000_000) as libc::time_t,
        tv_nsec: total_ns % 1_000_000_000,
    };
    unsafe {
        while libc::clock_nanosleep(
            libc::CLOCK_MONOTONIC,
            libc::TIMER_ABSTIME,
            &deadline,
            std::ptr::null_mut(),
        ) == libc::EINTR
        {}
    }
}

#[cfg(not(target_os = "linux"))]
fn abs_sleep(delta_us: u64) {
    std::thread::sleep(Duration::from_micros(delta_us));
}

#[cfg(all(target_os = "linux", target_arch = "x86"))]
fn init_ioport() -> Result<()> {
    if unsafe { libc::ioperm(0x80, 1, 1) } != 0 {
        return Err(ReplayError::resource(
            "I/O port 0x80",
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

#[cfg(all(target_os = "linux", target_arch = "x86"))]
fn ioport_wait(delta_us: u64) {
    // One read from port 0x80 takes about a microsecond on the ISA bus.
    for _ in 0..delta_us {
        unsafe {
            core::arch::asm!("in al, dx", out("al") _, in("dx") 0x80u16, options(nomem, nostack));
        }
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86")))]
fn ioport_wait(delta_us: u64) {
    // Unreachable: the strategy is rejected at configuration time.
    std::thread::sleep(Duration::from_micros(delta_us));
}
