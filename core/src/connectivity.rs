//! Connectivity probe gating interactive starts. A download engine started
//! with no usable network produces nothing but a confusing failure, so the
//! host checks first and advises the user instead.

/// Capability answering "is there a network worth starting on".
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Default probe for hosts without connectivity tracking: always online.
#[derive(Debug, Default)]
pub struct AssumeOnline;

impl ConnectivityProbe for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }
}
