use thiserror::Error;

/// Errors raised while turning configuration into monitors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Host {host} was configured to be in group {group} but does not exist")]
    UnknownGroupMember { host: String, group: String },

    #[error("Host name {0} is configured more than once")]
    DuplicateHost(String),

    #[error("Task {task} sets both an explicit day list and a dayStart/dayEnd range")]
    ConflictingDayRange { task: String },

    #[error("Task {task} uses day {day}, expected 0 (Sunday) through 6 (Saturday)")]
    InvalidDay { task: String, day: u32 },

    #[error("Ping rate ({rate}ms) for {name} is below the minimum of {min}ms")]
    PingRateTooLow { name: String, rate: u64, min: u64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
