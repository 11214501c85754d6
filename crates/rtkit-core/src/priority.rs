//! Priority classes and requested values

use crate::error::GrantError;

/// Nice level floor advertised by the service (`MinNiceLevel`)
pub const DEFAULT_MIN_NICE_LEVEL: i32 = -15;

/// Realtime CPU time budget per thread, 0 = unbounded (`RTTimeUSecMax`)
pub const RT_TIME_USEC_MAX: i64 = 0;

/// Scheduling class a caller may ask for
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorityClass {
    High = 0,
    Realtime = 1,
    Idle = 2,
}

impl PriorityClass {
    /// Polkit action guarding this class, if callers may request it remotely
    pub fn action_id(&self) -> Option<&'static str> {
        match self {
            PriorityClass::High => Some(crate::authority::ACTION_ACQUIRE_HIGH_PRIORITY),
            PriorityClass::Realtime => Some(crate::authority::ACTION_ACQUIRE_REAL_TIME),
            PriorityClass::Idle => None,
        }
    }
}

impl TryFrom<u8> for PriorityClass {
    type Error = GrantError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PriorityClass::High),
            1 => Ok(PriorityClass::Realtime),
            2 => Ok(PriorityClass::Idle),
            _ => Err(GrantError::failed("Unknown priority type")),
        }
    }
}

/// A priority class together with its requested value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Nice level for `SCHED_OTHER` (negative is higher)
    High(i32),
    /// Static realtime priority
    Realtime(u32),
    /// Idle-class priority
    Idle(u32),
}

impl Priority {
    pub fn class(&self) -> PriorityClass {
        match self {
            Priority::High(_) => PriorityClass::High,
            Priority::Realtime(_) => PriorityClass::Realtime,
            Priority::Idle(_) => PriorityClass::Idle,
        }
    }

    /// Build from a class and a raw wire value.
    pub fn from_class(class: PriorityClass, value: i64) -> Result<Self, GrantError> {
        let out_of_range = || GrantError::invalid_args("Priority value out of range");
        match class {
            PriorityClass::High => i32::try_from(value).map(Priority::High).map_err(|_| out_of_range()),
            PriorityClass::Realtime => {
                u32::try_from(value).map(Priority::Realtime).map_err(|_| out_of_range())
            }
            PriorityClass::Idle => u32::try_from(value).map(Priority::Idle).map_err(|_| out_of_range()),
        }
    }
}

/// Bounds the service advertises and enforces on requested values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityLimits {
    pub min_nice_level: i32,
    pub max_realtime_priority: i32,
}

impl PriorityLimits {
    pub const fn new(min_nice_level: i32, max_realtime_priority: i32) -> Self {
        Self { min_nice_level, max_realtime_priority }
    }

    /// Reject values outside the advertised bounds.
    pub fn check(&self, priority: Priority) -> Result<(), GrantError> {
        match priority {
            Priority::High(nice) if nice < self.min_nice_level => Err(GrantError::invalid_args(
                format!("Requested nice level {} is below the minimum {}", nice, self.min_nice_level),
            )),
            Priority::Realtime(p) if i64::from(p) > i64::from(self.max_realtime_priority) => {
                Err(GrantError::invalid_args(format!(
                    "Requested realtime priority {} is above the maximum {}",
                    p, self.max_realtime_priority
                )))
            }
            _ => Ok(()),
        }
    }
}
