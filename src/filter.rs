//! Exclusion and inclusion rules applied to listed entries.
//!
//! Name, regex and glob rules match the entry's original base name. Size
//! bounds exclude entries outside `[min_size, max_size]`; the age window keeps
//! only entries deleted within the last `max_age_days` days.

use crate::errors::{CoreError, Result};
use crate::helpers::parse_size;
use crate::models::TrashedEntry;
use chrono::{DateTime, Duration, Utc};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;

/// Filter settings as they appear in configuration files.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Exact base names to hide.
    pub exclude_names: Vec<String>,
    /// Regular expressions matched against the base name.
    pub exclude_patterns: Vec<String>,
    /// Shell globs matched against the base name.
    pub exclude_globs: Vec<String>,
    /// Human readable lower bound, e.g. `"1KB"`.
    pub min_size: Option<String>,
    /// Human readable upper bound, e.g. `"10MB"`.
    pub max_size: Option<String>,
    pub max_age_days: Option<u32>,
}

/// Compiled form of [`FilterConfig`].
#[derive(Debug, Clone, Default)]
pub struct Filter {
    names: HashSet<String>,
    patterns: Vec<Regex>,
    globs: Option<Gitignore>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    max_age: Option<Duration>,
}

impl Filter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let patterns = config
            .exclude_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| CoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            names: config.exclude_names.iter().cloned().collect(),
            patterns,
            globs: build_globs(&config.exclude_globs)?,
            min_size: config.min_size.as_deref().map(size_bound).transpose()?,
            max_size: config.max_size.as_deref().map(size_bound).transpose()?,
            max_age: config.max_age_days.map(|days| Duration::days(i64::from(days))),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
            && self.patterns.is_empty()
            && self.globs.is_none()
            && self.min_size.is_none()
            && self.max_size.is_none()
            && self.max_age.is_none()
    }

    /// True when `entry` survives every rule, with ages measured from `now`.
    pub fn matches_at(&self, entry: &TrashedEntry, now: DateTime<Utc>) -> bool {
        !self.excluded_by_name(entry) && self.within_size(entry.size) && self.within_age(entry, now)
    }

    pub fn matches(&self, entry: &TrashedEntry) -> bool {
        self.matches_at(entry, Utc::now())
    }

    pub fn apply_at(&self, entries: Vec<TrashedEntry>, now: DateTime<Utc>) -> Vec<TrashedEntry> {
        if self.is_empty() {
            return entries;
        }
        entries
            .into_iter()
            .filter(|entry| self.matches_at(entry, now))
            .collect()
    }

    pub fn apply(&self, entries: Vec<TrashedEntry>) -> Vec<TrashedEntry> {
        self.apply_at(entries, Utc::now())
    }

    fn excluded_by_name(&self, entry: &TrashedEntry) -> bool {
        if self.names.contains(&entry.name) {
            return true;
        }
        if self.patterns.iter().any(|re| re.is_match(&entry.name)) {
            return true;
        }
        self.globs
            .as_ref()
            .is_some_and(|globs| globs.matched(&entry.name, entry.is_dir).is_ignore())
    }

    fn within_size(&self, size: u64) -> bool {
        if let Some(min) = self.min_size {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if size > max {
                return false;
            }
        }
        true
    }

    fn within_age(&self, entry: &TrashedEntry, now: DateTime<Utc>) -> bool {
        match self.max_age {
            Some(max_age) => now.signed_duration_since(entry.deleted_at) < max_age,
            None => true,
        }
    }
}

fn size_bound(value: &str) -> Result<u64> {
    parse_size(value).map_err(|reason| CoreError::InvalidPattern {
        pattern: value.to_string(),
        reason,
    })
}

fn build_globs(globs: &[String]) -> Result<Option<Gitignore>> {
    if globs.is_empty() {
        return Ok(None);
    }
    let mut builder = GitignoreBuilder::new("/");
    for glob in globs {
        builder
            .add_line(None, glob)
            .map_err(|err| CoreError::InvalidPattern {
                pattern: glob.clone(),
                reason: err.to_string(),
            })?;
    }
    let matcher = builder.build().map_err(|err| CoreError::InvalidPattern {
        pattern: globs.join(", "),
        reason: err.to_string(),
    })?;
    Ok(Some(matcher))
}
