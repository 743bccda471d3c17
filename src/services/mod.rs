pub mod block_detector;
pub mod ip_probe;
pub mod rotation_policy;

pub use block_detector::BlockDetector;
pub use ip_probe::IpProbe;
pub use rotation_policy::{RotationDecision, RotationPolicy};
