//! Analysis WebSocket message types and codec.
//!
//! The analysis backend sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them into
//! a strongly-typed [`AnalysisMessage`] enum and serializes outbound
//! control messages back into the same envelope.

use serde::{Deserialize, Serialize};
use trafficlens_core::types::JobId;

/// All known analysis WebSocket message types.
///
/// Deserialized via the `"type"` tag with associated `"data"` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AnalysisMessage {
    /// Periodic progress tick for a running job.
    #[serde(rename = "progress_update")]
    ProgressUpdate(ProgressData),

    /// One vehicle detection event.
    #[serde(rename = "vehicle_detected")]
    VehicleDetected(DetectionData),

    /// Terminal success for the job.
    #[serde(rename = "processing_complete")]
    ProcessingComplete(CompletionData),

    /// Terminal server-reported failure. The only message surfaced to
    /// users as a failure; transport loss never is.
    #[serde(rename = "processing_error")]
    ProcessingError(ProcessingErrorData),

    /// Free-form diagnostic line from the pipeline.
    #[serde(rename = "log_message")]
    LogMessage(LogData),

    /// Rendered frame for the live preview.
    #[serde(rename = "frame_update")]
    FrameUpdate(FrameData),

    /// Same payload as `frame_update`, emitted by the batched pipeline.
    #[serde(rename = "frame_processed")]
    FrameProcessed(FrameData),

    /// Pre-processing model warm-up progress.
    #[serde(rename = "loading_progress")]
    LoadingProgress(LoadingData),
}

/// Payload for `progress_update` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    pub processed_frames: i64,
    pub total_frames: i64,
    pub vehicles_detected: i64,
    /// Completion percentage (0-100).
    pub percentage: f64,
    pub status: String,
}

/// Payload for `vehicle_detected` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionData {
    pub track_id: i64,
    pub vehicle_type: String,
    pub confidence: f64,
    pub frame_number: i64,
}

/// Payload for `processing_complete` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionData {
    pub analysis_id: JobId,
    pub total_vehicles: i64,
    /// Wall-clock processing time in seconds.
    pub processing_time: f64,
    /// Aggregate statistics (per-class counts, speed histograms, etc.).
    #[serde(default)]
    pub stats: serde_json::Value,
}

/// Payload for `processing_error` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingErrorData {
    pub error: String,
}

/// Payload for `log_message` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Payload for `frame_update` / `frame_processed` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameData {
    pub frame_number: i64,
    pub detections_count: i64,
    /// Base64-encoded JPEG of the annotated frame.
    pub frame_data: String,
    /// Capture time as a Unix epoch timestamp (seconds).
    pub timestamp: f64,
}

/// Payload for `loading_progress` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingData {
    /// Warm-up progress (0-100).
    pub progress: i32,
    pub message: String,
}

/// Fieldless mirror of [`AnalysisMessage`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ProgressUpdate,
    VehicleDetected,
    ProcessingComplete,
    ProcessingError,
    LogMessage,
    FrameUpdate,
    FrameProcessed,
    LoadingProgress,
}

impl MessageKind {
    /// The `type` string this kind carries on the wire.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::ProgressUpdate => "progress_update",
            Self::VehicleDetected => "vehicle_detected",
            Self::ProcessingComplete => "processing_complete",
            Self::ProcessingError => "processing_error",
            Self::LogMessage => "log_message",
            Self::FrameUpdate => "frame_update",
            Self::FrameProcessed => "frame_processed",
            Self::LoadingProgress => "loading_progress",
        }
    }

    /// Resolve a wire `type` string, `None` for unrecognised types.
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "progress_update" => Some(Self::ProgressUpdate),
            "vehicle_detected" => Some(Self::VehicleDetected),
            "processing_complete" => Some(Self::ProcessingComplete),
            "processing_error" => Some(Self::ProcessingError),
            "log_message" => Some(Self::LogMessage),
            "frame_update" => Some(Self::FrameUpdate),
            "frame_processed" => Some(Self::FrameProcessed),
            "loading_progress" => Some(Self::LoadingProgress),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl AnalysisMessage {
    /// The subscription key for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ProgressUpdate(_) => MessageKind::ProgressUpdate,
            Self::VehicleDetected(_) => MessageKind::VehicleDetected,
            Self::ProcessingComplete(_) => MessageKind::ProcessingComplete,
            Self::ProcessingError(_) => MessageKind::ProcessingError,
            Self::LogMessage(_) => MessageKind::LogMessage,
            Self::FrameUpdate(_) => MessageKind::FrameUpdate,
            Self::FrameProcessed(_) => MessageKind::FrameProcessed,
            Self::LoadingProgress(_) => MessageKind::LoadingProgress,
        }
    }
}

/// Result of decoding one inbound text frame.
///
/// Envelopes with an unrecognised `type` decode as [`Decoded::Unknown`]
/// so that a protocol extension on the server never kills a connection;
/// dispatch simply drops them.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed message of a known kind.
    Message(AnalysisMessage),
    /// A structurally valid envelope whose `type` is not in [`MessageKind`].
    Unknown {
        kind: String,
        data: serde_json::Value,
    },
}

/// Errors for frames the codec refuses.
///
/// Neither variant is fatal to the connection: the session logs the frame
/// and drops it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a JSON object carrying a `type` field.
    #[error("frame is not a {{type, data}} envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The `type` is known but the `data` does not match its payload shape.
    #[error("malformed {kind} payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Minimal envelope used to classify frames the typed parse rejected.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode the verbatim text payload of one inbound frame.
pub fn decode(text: &str) -> Result<Decoded, DecodeError> {
    match serde_json::from_str::<AnalysisMessage>(text) {
        Ok(message) => Ok(Decoded::Message(message)),
        Err(typed_err) => {
            let raw: RawEnvelope =
                serde_json::from_str(text).map_err(DecodeError::Envelope)?;
            match MessageKind::from_wire(&raw.kind) {
                Some(kind) => Err(DecodeError::Payload {
                    kind,
                    source: typed_err,
                }),
                None => Ok(Decoded::Unknown {
                    kind: raw.kind,
                    data: raw.data,
                }),
            }
        }
    }
}

/// Serialize an outbound message into its wire envelope.
///
/// Used only for the rare client-to-server control message;
/// `decode(encode(m))` yields `m` for every well-formed message.
pub fn encode(message: &AnalysisMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
