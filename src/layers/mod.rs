//! Layer controllers L1-L4 (§4.6): small policy objects wired together by
//! the orchestrator. Each is a thin, mostly-stateless seam so admission,
//! density progression, and activation policy can be swapped or tightened
//! independently, mirroring the teacher's small single-purpose controller
//! modules (`permissions::PermissionService`, `oauth::OAuthStore`).

mod l1_threshold;
mod l2_minotaur;
mod l3_blindfold;
mod l4_puppeteer;

pub use l1_threshold::ThresholdController;
pub use l2_minotaur::MinotaurController;
pub use l3_blindfold::BlindfoldController;
pub use l4_puppeteer::PuppeteerController;
