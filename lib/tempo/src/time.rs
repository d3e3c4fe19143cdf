use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// A point on the simulation clock, in microseconds since the start of the
/// run. Real wall-clock time never enters the kernel.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct VirtualTime(u64);

impl VirtualTime {
    pub const ZERO: VirtualTime = VirtualTime(0);

    #[inline]
    pub fn from_micros(micros: u64) -> VirtualTime {
        VirtualTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: u64) -> VirtualTime {
        VirtualTime(millis * 1_000)
    }

    #[inline]
    pub fn as_micros(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for VirtualTime {
    type Output = VirtualTime;

    #[inline]
    fn add(self, dt: Duration) -> VirtualTime {
        VirtualTime(self.0.saturating_add(dt.as_micros() as u64))
    }
}

impl fmt::Debug for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}
