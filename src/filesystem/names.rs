use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::NamingConfig;
use crate::error::{Result, SandboxFsError};
use crate::filesystem::durable::DurableFs;
use crate::filesystem::path::MAX_NAME_BYTES;

/// Generates collision-free duplicate ("report-copy1.txt") and untitled
/// ("Untitled1") names. Candidate sequences are lazy and restartable; callers
/// consume them by probing existence until one misses.
#[derive(Debug, Clone)]
pub struct NameResolver {
    untitled_stem: String,
    duplicate_token: String,
    duplicate_re: Regex,
    untitled_re: Regex,
}

/// Stem and extension split, `os.path.splitext` style: the extension starts at
/// the last dot unless that dot is the leading character of the name.
pub fn split_stem(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

impl NameResolver {
    pub fn new(cfg: &NamingConfig) -> Self {
        let duplicate_re = Regex::new(&format!(r"({})(\d+)$", regex::escape(&cfg.duplicate_token)))
            .expect("duplicate token pattern");
        let untitled_re = Regex::new(&format!(r"^({})(\d+)$", regex::escape(&cfg.untitled_stem)))
            .expect("untitled stem pattern");
        Self {
            untitled_stem: cfg.untitled_stem.clone(),
            duplicate_token: cfg.duplicate_token.clone(),
            duplicate_re,
            untitled_re,
        }
    }

    pub fn untitled_stem(&self) -> &str {
        &self.untitled_stem
    }

    /// Next duplicate name: a recognized "-copyN" stem suffix increments N,
    /// anything else gains "-copy1". Idempotent under repeated application --
    /// a copy of a copy increments rather than stacking suffixes.
    pub fn next_duplicate_name(&self, name: &str) -> String {
        let (stem, ext) = split_stem(name);
        match self.duplicate_re.captures(stem) {
            Some(caps) => {
                let ordinal: u64 = caps[2].parse().unwrap_or(0);
                let base = &stem[..caps.get(0).map(|m| m.start()).unwrap_or(0)];
                format!("{base}{}{}{ext}", self.duplicate_token, ordinal + 1)
            }
            None => format!("{stem}{}1{ext}", self.duplicate_token),
        }
    }

    /// Next untitled name: the bare untitled stem gains "1"; "UntitledN"
    /// increments N. Any other stem is a generation failure, guarding the
    /// caller's probe loop against never terminating.
    pub fn next_untitled_name(&self, name: &str) -> Result<String> {
        let (stem, ext) = split_stem(name);
        if stem == self.untitled_stem {
            return Ok(format!("{stem}1{ext}"));
        }
        let caps = self
            .untitled_re
            .captures(stem)
            .ok_or_else(|| SandboxFsError::internal(format!("Cannot derive untitled name from {name}")))?;
        let ordinal: u64 = caps[2]
            .parse()
            .map_err(|_| SandboxFsError::internal(format!("Cannot derive untitled name from {name}")))?;
        Ok(format!("{}{}{ext}", self.untitled_stem, ordinal + 1))
    }

    /// Lazy, restartable sequence of duplicate candidates for `name`.
    pub fn duplicate_candidates<'a>(&'a self, name: &str) -> impl Iterator<Item = String> + 'a {
        std::iter::successors(Some(self.next_duplicate_name(name)), move |prev| {
            Some(self.next_duplicate_name(prev))
        })
    }

    /// First duplicate sibling of `path` that does not exist. Returns the new
    /// absolute path and leaf name; re-validates the leaf length before use.
    pub fn resolve_duplicate_path(&self, durable: &DurableFs, path: &Path) -> Result<(PathBuf, String)> {
        let parent = path.parent().unwrap_or_else(|| Path::new("/"));
        let name = leaf_name(path)?;
        for candidate in self.duplicate_candidates(&name) {
            let candidate_path = parent.join(&candidate);
            if !durable.exists_sync(&candidate_path) {
                if candidate.len() > MAX_NAME_BYTES {
                    return Err(SandboxFsError::name_too_long(candidate));
                }
                return Ok((candidate_path, candidate));
            }
        }
        unreachable!("duplicate candidate sequence is infinite")
    }

    /// First untitled name (optionally with extension, e.g. ".ipynb") free in
    /// `dir`. Returns the new absolute path and leaf name.
    pub fn resolve_untitled_path(&self, durable: &DurableFs, dir: &Path, ext: &str) -> Result<(PathBuf, String)> {
        let mut name = format!("{}{ext}", self.untitled_stem);
        loop {
            let candidate = dir.join(&name);
            if !durable.exists_sync(&candidate) {
                if name.len() > MAX_NAME_BYTES {
                    return Err(SandboxFsError::name_too_long(name));
                }
                return Ok((candidate, name));
            }
            name = self.next_untitled_name(&name)?;
        }
    }
}

fn leaf_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SandboxFsError::illegal_path(format!("{} has no file name", path.display())))
}
