//! L2 MinotaurController — contradiction density progression (§4.6).

use crate::config::{ContradictionConfig, Density};
use crate::contradiction::{self, Contradiction};
use crate::session::Session;

#[derive(Debug, Clone, Copy)]
pub struct L2Config {
    pub density: Density,
    pub seed: u64,
}

pub struct MinotaurController {
    default: ContradictionConfig,
}

impl MinotaurController {
    pub fn new(default: ContradictionConfig) -> Self {
        Self { default }
    }

    /// Density at a given depth: depth >= 4 forces `high`; depth >= 2
    /// promotes `low` -> `medium` and `medium` -> `high`; otherwise the
    /// configured default.
    fn density_for_depth(&self, depth: u32) -> Density {
        if depth >= 4 {
            return Density::High;
        }
        if depth >= 2 {
            return match self.default.density {
                Density::Low => Density::Medium,
                Density::Medium => Density::High,
                Density::High => Density::High,
            };
        }
        self.default.density
    }

    pub fn initial_config(&self, session: &Session) -> L2Config {
        L2Config {
            density: self.density_for_depth(session.depth.max(1)),
            seed: contradiction::derive_seed(&session.id, session.depth.max(1)),
        }
    }

    pub fn next_config(&self, session: &Session, new_depth: u32) -> L2Config {
        L2Config {
            density: self.density_for_depth(new_depth),
            seed: contradiction::derive_seed(&session.id, new_depth),
        }
    }

    pub fn select(&self, config: L2Config, depth: u32) -> Vec<&'static Contradiction> {
        contradiction::select(config.density, depth.max(1), config.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ServiceTag, SessionRegistry};

    fn session_at_depth(depth: u32) -> Session {
        let reg = SessionRegistry::new("LBX");
        let s = reg.create("10.0.0.1", ServiceTag::Ssh);
        for _ in 1..depth {
            reg.mutate(&s.id, |s| s.bump_depth()).unwrap();
        }
        reg.get(&s.id).unwrap()
    }

    #[test]
    fn depth_four_forces_high() {
        let ctl = MinotaurController::new(ContradictionConfig {
            density: Density::Low,
            max_container_depth: 5,
            adaptive: false,
        });
        let session = session_at_depth(4);
        let cfg = ctl.initial_config(&session);
        assert_eq!(cfg.density, Density::High);
    }

    #[test]
    fn depth_two_promotes_low_to_medium() {
        let ctl = MinotaurController::new(ContradictionConfig {
            density: Density::Low,
            max_container_depth: 5,
            adaptive: false,
        });
        let session = session_at_depth(2);
        let cfg = ctl.initial_config(&session);
        assert_eq!(cfg.density, Density::Medium);
    }

    #[test]
    fn depth_one_uses_configured_default() {
        let ctl = MinotaurController::new(ContradictionConfig {
            density: Density::High,
            max_container_depth: 5,
            adaptive: false,
        });
        let session = session_at_depth(1);
        let cfg = ctl.initial_config(&session);
        assert_eq!(cfg.density, Density::High);
    }

    #[test]
    fn different_depths_yield_different_seeds() {
        let ctl = MinotaurController::new(ContradictionConfig {
            density: Density::Medium,
            max_container_depth: 5,
            adaptive: false,
        });
        let session = session_at_depth(1);
        let a = ctl.next_config(&session, 2);
        let b = ctl.next_config(&session, 3);
        assert_ne!(a.seed, b.seed);
    }
}
