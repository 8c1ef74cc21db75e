//! Real-time analysis event multiplexer.
//!
//! Opens, supervises, and tears down per-job WebSocket connections to the
//! traffic-analysis backend, decodes the typed `{type, data}` message
//! protocol, fans messages out to interested subscribers, and recovers
//! from transient network failure with bounded linear backoff.
//!
//! - [`SessionDirectory`] -- one live [`JobSession`] per job id.
//! - [`JobSession`] -- connection lifecycle state machine for one job.
//! - [`SubscriberRegistry`] -- per-kind handler bookkeeping and fan-out.
//! - [`messages`] -- the `{type, data}` wire codec.
//! - [`JobsApi`] -- thin REST wrapper for job control (create/start/
//!   pause/resume/status), consumed by callers, never by the core.

pub mod api;
pub mod directory;
pub mod messages;
pub mod reconnect;
pub mod registry;
pub mod session;

pub use api::{JobsApi, JobsApiError};
pub use directory::{RealtimeConfig, SessionDirectory};
pub use messages::{AnalysisMessage, DecodeError, Decoded, MessageKind};
pub use reconnect::ReconnectPolicy;
pub use registry::{SubscriberRegistry, SubscriptionId};
pub use session::{JobSession, SessionError, SessionState};
