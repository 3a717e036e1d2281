//! L1 ThresholdController — connection admission (§4.6).

use crate::session::ServiceTag;

/// Currently admits everything; the seam exists to insert rate-limiting or
/// allow-lists without touching the orchestrator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdController;

impl ThresholdController {
    pub fn new() -> Self {
        Self
    }

    pub fn admit(&self, _src_ip: &str, _service: ServiceTag) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_everything() {
        let c = ThresholdController::new();
        assert!(c.admit("10.0.0.1", ServiceTag::Ssh));
        assert!(c.admit("10.0.0.2", ServiceTag::Http));
    }
}
