//! Platform dispatch: pick the extraction capability for a locator.
//!
//! The registry holds an ordered table of `(platform, patterns)` rules.
//! Rules are tried in declaration order and the first matching pattern
//! wins, so a narrow pattern must be declared before a broader one that
//! could shadow it. Unmatched locators resolve to [`GENERIC_PLATFORM`].
//! Resolution never fails: a missing or broken factory degrades to the
//! fallback capability.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::locator;
use crate::traits::{CapabilityFactory, ExtractionCapability};

/// Platform id used when no rule matches.
pub const GENERIC_PLATFORM: &str = "generic";

/// A host pattern with an optional path glob, e.g. `coupang.com/vp/products/*`.
///
/// - host `*` matches any host
/// - a host matches itself and any of its subdomains
/// - the path is a prefix glob where `*` matches any run of characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocatorPattern {
    host: String,
    path: Option<String>,
}

impl LocatorPattern {
    pub fn parse(pattern: &str) -> Result<Self, AppError> {
        let trimmed = pattern
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let (host, path) = match trimmed.find('/') {
            Some(idx) => (&trimmed[..idx], Some(&trimmed[idx..])),
            None => (trimmed, None),
        };
        let host = host.trim_start_matches("*.").to_ascii_lowercase();
        if host.is_empty() {
            return Err(AppError::ConfigError(format!(
                "Locator pattern '{pattern}' has no host"
            )));
        }
        Ok(Self {
            host,
            path: path.filter(|p| *p != "/" && *p != "/*").map(String::from),
        })
    }

    pub fn matches(&self, host: &str, path: &str) -> bool {
        host_matches(&self.host, host)
            && self.path.as_deref().is_none_or(|glob| glob_prefix_match(glob, path))
    }
}

impl TryFrom<String> for LocatorPattern {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LocatorPattern> for String {
    fn from(pattern: LocatorPattern) -> Self {
        pattern.to_string()
    }
}

impl fmt::Display for LocatorPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host, self.path.as_deref().unwrap_or(""))
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" || pattern == host {
        return true;
    }
    host.strip_suffix(pattern)
        .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Prefix match where `*` stands for any (possibly empty) run of characters.
fn glob_prefix_match(glob: &str, path: &str) -> bool {
    let mut parts = glob.split('*');
    let Some(first) = parts.next() else {
        return true;
    };
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };
    for part in parts {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

/// One row of the dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRule {
    pub platform: String,
    pub patterns: Vec<LocatorPattern>,
}

impl PlatformRule {
    pub fn new(platform: impl Into<String>, patterns: &[&str]) -> Result<Self, AppError> {
        Ok(Self {
            platform: platform.into(),
            patterns: patterns
                .iter()
                .map(|p| LocatorPattern::parse(p))
                .collect::<Result<_, _>>()?,
        })
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(host, path))
    }
}

/// The capability chosen for one locator.
#[derive(Clone)]
pub struct Resolution {
    pub platform: String,
    pub capability: Arc<dyn ExtractionCapability>,
    /// True when the platform had no usable factory and the fallback is used.
    pub degraded: bool,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("platform", &self.platform)
            .field("capability", &self.capability.name())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Ordered dispatch table plus the factories behind it.
pub struct CapabilityRegistry {
    rules: Vec<PlatformRule>,
    factories: HashMap<String, Arc<dyn CapabilityFactory>>,
    fallback: Arc<dyn ExtractionCapability>,
}

impl CapabilityRegistry {
    pub fn new(fallback: Arc<dyn ExtractionCapability>) -> Self {
        Self {
            rules: Vec::new(),
            factories: HashMap::new(),
            fallback,
        }
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn with_rule(mut self, rule: PlatformRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn register(
        mut self,
        platform: impl Into<String>,
        factory: impl CapabilityFactory + 'static,
    ) -> Self {
        self.factories.insert(platform.into(), Arc::new(factory));
        self
    }

    pub fn rules(&self) -> &[PlatformRule] {
        &self.rules
    }

    pub fn has_factory(&self, platform: &str) -> bool {
        self.factories.contains_key(platform)
    }

    /// Platform id for a locator; unparseable locators are generic.
    pub fn detect(&self, locator: &str) -> &str {
        let Some((host, path)) = locator::host_and_path(locator) else {
            return GENERIC_PLATFORM;
        };
        self.rules
            .iter()
            .find(|rule| rule.matches(&host, &path))
            .map_or(GENERIC_PLATFORM, |rule| rule.platform.as_str())
    }

    pub fn resolve(&self, locator: &str) -> Resolution {
        let platform = self.detect(locator).to_string();

        let capability = match self.factories.get(&platform) {
            Some(factory) => match factory.create(&platform) {
                Ok(capability) => Some(capability),
                Err(e) => {
                    tracing::warn!(%platform, %locator, error = %e, "Capability factory failed, using fallback");
                    None
                }
            },
            None => None,
        };

        match capability {
            Some(capability) => Resolution {
                platform,
                capability,
                degraded: false,
            },
            None => {
                tracing::debug!(%platform, %locator, fallback = self.fallback.name(), "Dispatch degraded");
                Resolution {
                    platform,
                    capability: Arc::clone(&self.fallback),
                    degraded: true,
                }
            }
        }
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut factories: Vec<&String> = self.factories.keys().collect();
        factories.sort();
        f.debug_struct("CapabilityRegistry")
            .field("rules", &self.rules)
            .field("factories", &factories)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
