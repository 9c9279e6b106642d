//! Picks the version string sent with an upload.
//!
//! Precedence: an explicit version, then the base floor (when it is above
//! the repository's current version), then current + increment, then the
//! current version unchanged. A non-numeric current version skips both
//! numeric rules.

use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionPolicy {
    /// Upload exactly this version.
    pub version: Option<String>,
    /// Never upload a version below this.
    pub base: Option<String>,
    /// Added to the current version.
    pub increment: Option<String>,
}

impl VersionPolicy {
    pub fn effective_version(&self, current: &str) -> String {
        if let Some(ref version) = self.version {
            return version.clone();
        }

        let Some(current_num) = parse_number(current) else {
            return current.to_string();
        };

        if let Some(ref base) = self.base {
            match parse_number(base) {
                Some(base_num) if base_num > current_num => return base.trim().to_string(),
                Some(_) => {}
                None => warn!(base = %base, "Ignoring non-numeric base version"),
            }
        }

        if let Some(ref increment) = self.increment {
            match parse_number(increment) {
                Some(step) => {
                    let places = decimal_places(current).max(decimal_places(increment));
                    return format!("{:.*}", places, current_num + step);
                }
                None => warn!(increment = %increment, "Ignoring non-numeric version increment"),
            }
        }

        current.to_string()
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn decimal_places(s: &str) -> usize {
    s.trim()
        .split_once('.')
        .map(|(_, fraction)| fraction.len())
        .unwrap_or(0)
}
