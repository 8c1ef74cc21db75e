/// Analysis jobs are identified by the positive integer the platform API
/// assigns at submission. Never reused while a session for it is alive.
pub type JobId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
