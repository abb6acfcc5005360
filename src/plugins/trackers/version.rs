use crate::plugins::traits::{
    TrackerPlugin, ParseResult, ComparisonResult, ElementMatch, ConfigSchema, ChangeType, BestDirection,
};
use crate::plugins::traits::tracker::{ConfigField, ConfigFieldType};
use super::common::{self, CandidateVerdict, EXACT_MATCH_BONUS};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::cmp::Ordering;

const VERSION_KEYWORDS: &[&str] = &["version", "release", "tag", "build", "changelog"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Strict `MAJOR.MINOR.PATCH[-pre][+build]`, optional leading `v`.
    pub fn parse(version_str: &str) -> Option<Self> {
        let trimmed = version_str.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);

        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, Some(build.to_string())),
            None => (trimmed, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (rest, None),
        };

        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }

        Some(Version { major, minor, patch, prerelease, build })
    }

    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if let Some(version) = value.get("version").and_then(|v| v.as_str()).and_then(Version::parse) {
            return Some(version);
        }

        Some(Version {
            major: value.get("major")?.as_u64()?,
            minor: value.get("minor").and_then(|v| v.as_u64()).unwrap_or(0),
            patch: value.get("patch").and_then(|v| v.as_u64()).unwrap_or(0),
            prerelease: value.get("prerelease").and_then(|v| v.as_str()).map(str::to_string),
            build: value.get("build").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    pub fn to_value(&self) -> serde_json::Value {
        json!({
            "version": self.to_string(),
            "major": self.major,
            "minor": self.minor,
            "patch": self.patch,
            "prerelease": self.prerelease,
            "build": self.build,
        })
    }

    /// Semver precedence. Build metadata never participates; a release outranks any
    /// prerelease of the same core.
    pub fn precedence(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }

    fn core(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.core())?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VersionMatchKind {
    Full,
    MajorMinor,
    Keyword,
}

pub struct VersionTracker {
    // Tried in order, most specific first
    patterns: Vec<(VersionMatchKind, Regex)>,
}

impl Default for VersionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionTracker {
    pub fn new() -> Self {
        let patterns = [
            (
                VersionMatchKind::Full,
                r"(?:^|[^\w.])([vV])?(\d+)\.(\d+)\.(\d+)(?:-([0-9A-Za-z][0-9A-Za-z.-]*))?(?:\+([0-9A-Za-z][0-9A-Za-z.-]*))?",
            ),
            (VersionMatchKind::MajorMinor, r"(?:^|[^\w.])([vV])?(\d+)\.(\d+)\b"),
            (VersionMatchKind::Keyword, r"(?i)\b(?:version|release|ver)\s+v?(\d+)\b"),
        ]
        .into_iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|regex| (kind, regex)))
        .collect();

        VersionTracker { patterns }
    }

    fn extract_version(&self, text: &str) -> Option<(Version, VersionMatchKind, bool)> {
        self.patterns.iter().find_map(|(kind, regex)| {
            let captures = regex.captures(text)?;
            let component = |idx: usize| captures.get(idx).and_then(|m| m.as_str().parse::<u64>().ok());
            let tail = |idx: usize| captures.get(idx).map(|m| m.as_str().trim_end_matches(['.', '-']).to_string());

            let (version, v_prefix) = match kind {
                VersionMatchKind::Full => (
                    Version {
                        major: component(2)?,
                        minor: component(3)?,
                        patch: component(4)?,
                        prerelease: tail(5),
                        build: tail(6),
                    },
                    captures.get(1).is_some(),
                ),
                VersionMatchKind::MajorMinor => (
                    Version {
                        major: component(2)?,
                        minor: component(3)?,
                        patch: 0,
                        prerelease: None,
                        build: None,
                    },
                    captures.get(1).is_some(),
                ),
                VersionMatchKind::Keyword => (
                    Version {
                        major: component(1)?,
                        minor: 0,
                        patch: 0,
                        prerelease: None,
                        build: None,
                    },
                    false,
                ),
            };
            Some((version, *kind, v_prefix))
        })
    }

    fn score(text: &str, version: &Version, kind: VersionMatchKind, v_prefix: bool) -> f32 {
        let mut confidence: f32 = match kind {
            VersionMatchKind::Full => 60.0,
            VersionMatchKind::MajorMinor => 40.0,
            VersionMatchKind::Keyword => 30.0,
        };

        if v_prefix || common::mentions_any(text, &["version", "release"]) {
            confidence += 20.0;
        }
        if version.major < 1000 {
            confidence += 10.0;
        }

        confidence.clamp(0.0, 100.0)
    }
}

#[async_trait]
impl TrackerPlugin for VersionTracker {
    fn name(&self) -> &str {
        "Version Tracker"
    }

    fn plugin_type(&self) -> &str {
        "version"
    }

    fn description(&self) -> &str {
        "Tracks semantic version changes on web pages"
    }

    fn parse(&self, text: &str) -> ParseResult {
        let Some((version, kind, v_prefix)) = self.extract_version(text) else {
            return ParseResult::failed();
        };

        let mut metadata = HashMap::new();
        metadata.insert(
            "pattern".to_string(),
            match kind {
                VersionMatchKind::Full => "semver",
                VersionMatchKind::MajorMinor => "major_minor",
                VersionMatchKind::Keyword => "keyword",
            }
            .to_string(),
        );

        ParseResult {
            success: true,
            value: version.to_value(),
            normalized: version.to_string(),
            confidence: Self::score(text, &version, kind, v_prefix),
            metadata,
        }
    }

    fn format(&self, value: &serde_json::Value) -> String {
        Version::from_value(value)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }

    fn compare(&self, old_value: &serde_json::Value, new_value: &serde_json::Value) -> ComparisonResult {
        let (Some(old), Some(new)) = (Version::from_value(old_value), Version::from_value(new_value)) else {
            return ComparisonResult::unchanged();
        };

        let change_type = match new.precedence(&old) {
            Ordering::Greater => ChangeType::Increased,
            Ordering::Less => ChangeType::Decreased,
            Ordering::Equal => return ComparisonResult::unchanged(),
        };

        // Magnitude of the most significant component that moved
        let difference = [(old.major, new.major), (old.minor, new.minor), (old.patch, new.patch)]
            .into_iter()
            .find(|(a, b)| a != b)
            .map(|(a, b)| a.abs_diff(b) as f64)
            .unwrap_or(0.0);

        ComparisonResult {
            changed: true,
            change_type,
            difference,
            percent_change: None,
        }
    }

    fn validate_value(&self, value: &serde_json::Value) -> bool {
        value.get("version").and_then(|v| v.as_str()).and_then(Version::parse).is_some()
    }

    /// Minor and patch are capped at 999 so the scalar never inverts precedence; values
    /// past the cap collapse together. Orderings go through `compare`.
    fn scalar(&self, value: &serde_json::Value) -> Option<f64> {
        Version::from_value(value).map(|v| {
            v.major as f64 * 1_000_000.0 + v.minor.min(999) as f64 * 1_000.0 + v.patch.min(999) as f64
        })
    }

    fn best_direction(&self) -> BestDirection {
        BestDirection::Highest
    }

    fn describe_change(
        &self,
        old_value: &serde_json::Value,
        new_value: &serde_json::Value,
        _comparison: &ComparisonResult,
    ) -> String {
        format!("{} → {}", self.format(old_value), self.format(new_value))
    }

    fn get_search_variations(&self, input: &str) -> Vec<String> {
        let mut variations = vec![input.trim().to_string()];

        let Some((version, _, _)) = self.extract_version(input) else {
            return common::dedupe(variations);
        };

        let mut forms = vec![version.to_string()];
        if version.prerelease.is_some() || version.build.is_some() {
            forms.push(version.core());
        }
        if version.patch == 0 && version.prerelease.is_none() {
            forms.push(format!("{}.{}", version.major, version.minor));
        }

        for form in &forms {
            variations.push(form.clone());
            variations.push(format!("v{}", form));
            variations.push(format!("V{}", form));
            variations.push(format!("version {}", form));
            variations.push(format!("Version {}", form));
            variations.push(format!("release {}", form));
            variations.push(format!("Release {}", form));
        }

        common::dedupe(variations)
    }

    fn rank_matches(&self, input: &str, matches: &[ElementMatch]) -> Vec<ElementMatch> {
        let target = self.extract_version(input).map(|(v, _, _)| v);

        common::rerank(matches, VERSION_KEYWORDS, |candidate| {
            match (self.extract_version(&candidate.text), &target) {
                (Some((found, _, _)), Some(target)) if found.precedence(target) == Ordering::Equal => {
                    CandidateVerdict::Keep(EXACT_MATCH_BONUS)
                }
                _ => CandidateVerdict::Keep(0.0),
            }
        })
    }

    fn get_config_schema(&self) -> ConfigSchema {
        ConfigSchema {
            fields: vec![
                ConfigField {
                    name: "include_pre_release".to_string(),
                    field_type: ConfigFieldType::Checkbox,
                    label: "Include Pre-release Versions".to_string(),
                    required: false,
                    default: Some(json!(true)),
                    options: None,
                },
            ],
        }
    }
}
