use std::time::Duration;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_PARALLELISM: usize = 16;

/// What a listing the grammar rejects does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseFailurePolicy {
    /// Keep the target in the report, marked as failed.
    #[default]
    Record,
    /// Stop collecting and fail the whole run.
    Abort,
}

#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub deadline: Duration,
    pub parallelism: usize,
    pub omit_empty: bool,
    pub on_parse_failure: ParseFailurePolicy,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            parallelism: DEFAULT_PARALLELISM,
            omit_empty: false,
            on_parse_failure: ParseFailurePolicy::Record,
        }
    }
}
