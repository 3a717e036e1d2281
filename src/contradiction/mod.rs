//! Contradiction catalog and seeded selector (§3, §4.4).
//!
//! The catalog is a compile-time table — a tagged list, not a database —
//! which keeps the selector a pure function and trivially testable (§9).

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::config::Density;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Os,
    Packages,
    Locale,
    Credentials,
    History,
    Network,
}

/// Immutable catalog entry (§3 Data Model).
#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    pub name: &'static str,
    pub category: Category,
    pub description: &'static str,
    pub fragments: &'static [&'static str],
    pub difficulty: u8, // 1..=3
}

macro_rules! entry {
    ($name:expr, $cat:expr, $desc:expr, [$($frag:expr),+ $(,)?], $diff:expr) => {
        Contradiction {
            name: $name,
            category: $cat,
            description: $desc,
            fragments: &[$($frag),+],
            difficulty: $diff,
        }
    };
}

/// The static, process-wide catalog. Order is insignificant; the selector
/// never relies on index stability across builds.
pub static CATALOG: &[Contradiction] = &[
    entry!(
        "os-release-mismatch",
        Category::Os,
        "reports a Linux distro release inconsistent with installed packages",
        ["echo 'NAME=\"Rocky Linux\"' > /etc/os-release.bait 2>/dev/null"],
        1
    ),
    entry!(
        "hostname-drift",
        Category::Os,
        "hostname does not match the one baked into MOTD",
        ["hostname db-primary-03 2>/dev/null"],
        1
    ),
    entry!(
        "kernel-version-spoof",
        Category::Os,
        "uname reports a kernel version newer than installed modules",
        ["mkdir -p /tmp/.cache && echo '5.19.0-spoof' > /tmp/.cache/kver 2>/dev/null"],
        2
    ),
    entry!(
        "package-manager-confusion",
        Category::Packages,
        "apt and rpm databases both present with conflicting package lists",
        ["touch /var/lib/rpm/.bait 2>/dev/null"],
        2
    ),
    entry!(
        "stale-update-log",
        Category::Packages,
        "package manager log claims updates ran yesterday; binaries are untouched",
        ["echo \"$(date -d yesterday 2>/dev/null || date) upgrade complete\" >> /var/log/dpkg.log.bait 2>/dev/null"],
        1
    ),
    entry!(
        "phantom-security-patch",
        Category::Packages,
        "CVE patch changelog entry with no corresponding binary change",
        ["echo 'CVE-2024-9999 patched' >> /usr/share/doc/changelog.bait 2>/dev/null"],
        3
    ),
    entry!(
        "locale-timezone-split",
        Category::Locale,
        "system locale and timezone imply two different countries",
        ["echo 'LANG=ja_JP.UTF-8' > /etc/default/locale.bait 2>/dev/null"],
        1
    ),
    entry!(
        "keyboard-layout-mismatch",
        Category::Locale,
        "configured keyboard layout does not match locale",
        ["echo 'XKBLAYOUT=\"de\"' >> /etc/default/keyboard.bait 2>/dev/null"],
        2
    ),
    entry!(
        "stale-cached-credential",
        Category::Credentials,
        "a cached credential file for a service no longer installed",
        ["mkdir -p ~/.aws && echo '[default]' > ~/.aws/credentials.bait 2>/dev/null"],
        2
    ),
    entry!(
        "orphaned-ssh-key",
        Category::Credentials,
        "an authorized_keys entry referencing a deprovisioned host",
        ["mkdir -p ~/.ssh && echo 'ssh-rsa AAAAB3NzaC1yc2EAAAA bait@retired-host' >> ~/.ssh/authorized_keys.bait 2>/dev/null"],
        2
    ),
    entry!(
        "expired-service-token",
        Category::Credentials,
        "environment exports a service token with a visibly expired timestamp",
        ["echo 'export SERVICE_TOKEN_EXPIRES=2019-01-01' >> ~/.bashrc.bait 2>/dev/null"],
        3
    ),
    entry!(
        "history-gap",
        Category::History,
        "shell history has a multi-day gap spanning an alleged incident window",
        ["touch -d '3 days ago' ~/.bash_history.bait 2>/dev/null"],
        2
    ),
    entry!(
        "history-self-reference",
        Category::History,
        "shell history references commands against this same honeypot's hostname",
        ["echo 'ssh admin@db-primary-03' >> ~/.bash_history.bait 2>/dev/null"],
        2
    ),
    entry!(
        "command-not-found-inconsistency",
        Category::History,
        "history shows a tool being used that is not installed",
        ["echo 'kubectl get pods' >> ~/.bash_history.bait 2>/dev/null"],
        1
    ),
    entry!(
        "routing-table-bait",
        Category::Network,
        "static route to a subnet with no corresponding interface",
        ["ip route add 10.99.0.0/24 dev eth0 2>/dev/null || true"],
        3
    ),
    entry!(
        "hosts-file-bait-entries",
        Category::Network,
        "/etc/hosts lists internal-looking hostnames that do not resolve",
        ["echo '10.50.0.5 vault-internal.corp' >> /etc/hosts.bait 2>/dev/null"],
        1
    ),
    entry!(
        "dns-search-domain-leak",
        Category::Network,
        "resolv.conf search domain implies an internal corporate network",
        ["echo 'search corp.internal' >> /etc/resolv.conf.bait 2>/dev/null"],
        2
    ),
];

fn base_count(density: Density) -> usize {
    match density {
        Density::Low => 3,
        Density::Medium => 6,
        Density::High => 10,
    }
}

fn pool_for_depth(depth: u32) -> Vec<&'static Contradiction> {
    match depth {
        1 => CATALOG.iter().filter(|c| c.difficulty <= 2).collect(),
        2 => CATALOG.iter().filter(|c| c.difficulty <= 3).collect(),
        _ => CATALOG.iter().collect(),
    }
}

fn mandatory_credentials(depth: u32) -> usize {
    match depth {
        1 => 0,
        2 => 1,
        _ => 2,
    }
}

/// Seeded, pure selection. Same `(density, depth, seed)` always yields the
/// same list (§4.4, §8 determinism property).
pub fn select(density: Density, depth: u32, seed: u64) -> Vec<&'static Contradiction> {
    let effective_count = (base_count(density) + depth.saturating_sub(1) as usize).min(CATALOG.len());
    let pool = pool_for_depth(depth);
    let required_creds = mandatory_credentials(depth).min(effective_count);

    let mut rng = StdRng::seed_from_u64(seed);

    let mut credential_pool: Vec<&'static Contradiction> = pool
        .iter()
        .filter(|c| c.category == Category::Credentials)
        .copied()
        .collect();
    credential_pool.shuffle(&mut rng);
    let mandatory: Vec<&'static Contradiction> =
        credential_pool.into_iter().take(required_creds).collect();

    let mandatory_names: Vec<&str> = mandatory.iter().map(|c| c.name).collect();
    let mut rest: Vec<&'static Contradiction> = pool
        .into_iter()
        .filter(|c| !mandatory_names.contains(&c.name))
        .collect();
    rest.shuffle(&mut rng);

    let remaining = effective_count.saturating_sub(mandatory.len());
    let mut selected = mandatory;
    selected.extend(rest.into_iter().take(remaining));
    selected
}

/// Derive a selection seed from a session id (and optional depth), so
/// repeated escalations within the same session draw different sets
/// (§4.6 L2 MinotaurController).
pub fn derive_seed(session_id: &str, depth: u32) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    depth.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_is_deterministic() {
        let a = select(Density::Medium, 2, 42);
        let b = select(Density::Medium, 2, 42);
        let names_a: Vec<&str> = a.iter().map(|c| c.name).collect();
        let names_b: Vec<&str> = b.iter().map(|c| c.name).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn different_seeds_usually_differ() {
        let a = select(Density::High, 3, 1);
        let b = select(Density::High, 3, 2);
        let names_a: Vec<&str> = a.iter().map(|c| c.name).collect();
        let names_b: Vec<&str> = b.iter().map(|c| c.name).collect();
        assert_ne!(names_a, names_b);
    }

    #[test]
    fn depth_monotonicity() {
        for seed in [1u64, 2, 3] {
            let low = select(Density::Low, 1, seed);
            let high = select(Density::Low, 2, seed);
            assert!(high.len() >= low.len());
        }
    }

    #[test]
    fn depth_three_has_two_credentials() {
        for seed in [10u64, 20, 30, 40] {
            let selection = select(Density::Medium, 3, seed);
            let creds = selection
                .iter()
                .filter(|c| c.category == Category::Credentials)
                .count();
            assert!(creds >= 2, "seed {seed} only had {creds} credential entries");
        }
    }

    #[test]
    fn depth_two_has_one_credential() {
        let selection = select(Density::Low, 2, 7);
        let creds = selection
            .iter()
            .filter(|c| c.category == Category::Credentials)
            .count();
        assert!(creds >= 1);
    }

    #[test]
    fn depth_one_excludes_difficulty_three() {
        let selection = select(Density::High, 1, 99);
        assert!(selection.iter().all(|c| c.difficulty <= 2));
    }
}
