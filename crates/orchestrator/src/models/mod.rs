//! Data model (spec §3): room servers, recorder nodes, recording jobs, and
//! the metrics snapshot the aggregator publishes.

mod job;
mod metrics;
mod node;

pub use job::{
    ContainerFormat, PeerDescriptor, PostRunMetrics, Quality, RecordingJob, RecordingOptions,
    RequesterDescriptor, RtpForwardingConfig, RtpStreamDescriptor, StreamKind,
};
pub use metrics::{MetricsSnapshot, RegionalMetrics};
pub use node::{HardwareDescriptor, RecorderNode, RoomServer};
