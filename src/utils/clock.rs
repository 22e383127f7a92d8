use std::{marker::PhantomData, mem::MaybeUninit};

use tracing::warn;

/// Monotonic clock
#[derive(Debug)]
pub struct Monotonic;

impl ClockSource for Monotonic {
    fn id() -> libc::clockid_t {
        libc::CLOCK_MONOTONIC
    }
}

/// Id for a clock according to unix clockid_t
pub trait ClockSource {
    /// Gets the id of the clock source
    fn id() -> libc::clockid_t;
}

/// Source of the timestamps carried by frame-done events
#[derive(Debug)]
pub struct Clock<Kind> {
    clk_id: libc::clockid_t,
    _kind: PhantomData<Kind>,
}

impl<Kind: ClockSource> Clock<Kind> {
    /// Open the clock, failing if the system does not provide it
    pub fn new() -> std::io::Result<Self> {
        let clk_id = Kind::id();
        clock_get_time(clk_id)?;
        Ok(Clock {
            clk_id,
            _kind: PhantomData,
        })
    }

    /// Returns the current time
    ///
    /// The clock was probed in [`Clock::new`], a later read failure yields the epoch.
    pub fn now(&self) -> Time<Kind> {
        let tp = clock_get_time(self.clk_id).unwrap_or_else(|err| {
            warn!(?err, "failed to read clock");
            libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            }
        });
        Time {
            tp,
            _kind: PhantomData,
        }
    }
}

/// A reading of a [`Clock`]
pub struct Time<Kind> {
    tp: libc::timespec,
    _kind: PhantomData<Kind>,
}

impl<Kind> Time<Kind> {
    /// Milliseconds since the clock origin, wrapping like the 32-bit timestamps on the wire
    pub fn as_millis(&self) -> u32 {
        let millis = (self.tp.tv_sec as i64)
            .wrapping_mul(1000)
            .wrapping_add(self.tp.tv_nsec as i64 / 1_000_000);
        millis as u32
    }
}

impl<Kind> std::fmt::Debug for Time<Kind> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Time").field(&self.as_millis()).finish()
    }
}

fn clock_get_time(clk_id: libc::clockid_t) -> Result<libc::timespec, std::io::Error> {
    let mut tp = MaybeUninit::zeroed();
    unsafe {
        if libc::clock_gettime(clk_id, tp.as_mut_ptr()) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(tp.assume_init())
    }
}
