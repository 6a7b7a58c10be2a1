use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("{0} must not be null")]
    MissingArgument(&'static str),

    #[error("{name} must be >= 0")]
    NegativeAmount { name: &'static str },

    #[error("ad hoc withdrawal for age {age} must be >= 0")]
    NegativeAdhocWithdrawal { age: u32 },

    #[error("years must be >= 0, got {0}")]
    NegativeYears(i64),

    #[error("target age {age} must be between {start} and {end} inclusive")]
    TargetAgeOutOfRange { age: u32, start: u32, end: u32 },

    #[error("required amounts must not be empty")]
    EmptyRequiredAmounts,

    #[error("years must be at most {max}, got {years}")]
    TooManyYears { years: i64, max: i64 },

    #[error("amounts grew beyond the representable decimal range")]
    Overflow,

    #[error("invalid tax rule set: {0}")]
    InvalidRules(String),
}

impl SimulationError {
    /// True for errors caused by an absent argument rather than a bad value.
    pub fn is_missing(&self) -> bool {
        matches!(self, SimulationError::MissingArgument(_))
    }
}
