//! Known-bug filter
//!
//! Maps a mnemonic (or a `prefix*` pattern) to operand-value patterns that
//! are known to trip a bug in the device under test. Candidates matching a
//! pattern are rejected before they reach the output. A separate CSR
//! blacklist keeps named CSRs out of operand synthesis altogether.
//!
//! Values are matched positionally: destination values after execution
//! first, then source values before execution.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::config::TargetArch;
use crate::error::{Result, SynthError};

/// One position of an operand pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternToken {
    Any,
    Value(u64),
}

impl FromStr for PatternToken {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self> {
        let t = s.trim().to_ascii_lowercase();
        if t == "*" {
            return Ok(PatternToken::Any);
        }
        let parsed = if let Some(hex) = t.strip_prefix("0x") {
            u64::from_str_radix(hex, 16).ok()
        } else if let Some(neg) = t.strip_prefix('-') {
            neg.parse::<u64>().ok().map(|v| v.wrapping_neg())
        } else {
            t.parse::<u64>().ok()
        };
        parsed
            .map(PatternToken::Value)
            .ok_or_else(|| SynthError::InvalidBugPattern(format!("`{}` is neither `*` nor a number", s)))
    }
}

impl fmt::Display for PatternToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternToken::Any => write!(f, "*"),
            PatternToken::Value(v) => write!(f, "0x{:x}", v),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BugPattern {
    pub name: String,
    pub tokens: Vec<PatternToken>,
}

impl BugPattern {
    /// An empty pattern matches anything. Otherwise `values` must cover
    /// every position and each literal must be equal.
    pub fn matches(&self, values: &[u64]) -> bool {
        if values.len() < self.tokens.len() {
            return false;
        }
        self.tokens.iter().zip(values).all(|(t, v)| match t {
            PatternToken::Any => true,
            PatternToken::Value(x) => x == v,
        })
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    bugs: Vec<BugEntry>,
    #[serde(default)]
    csr_blacklist: Vec<String>,
}

#[derive(Deserialize)]
struct BugEntry {
    mnemonic: String,
    name: String,
    #[serde(default)]
    pattern: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct BugFilter {
    exact: HashMap<String, Vec<BugPattern>>,
    /// `(prefix, pattern)` in registration order.
    prefixed: Vec<(String, BugPattern)>,
    csr_blacklist: HashSet<String>,
}

impl BugFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in registry for a target. None of the targets ships entries;
    /// they are added from a registry file once a bug is confirmed.
    pub fn for_target(target: TargetArch) -> Self {
        let filter = Self::new();
        debug!(%target, bugs = filter.len(), "known-bug registry loaded");
        filter
    }

    pub fn add_bug(&mut self, mnemonic: &str, name: &str, pattern: &[&str]) -> Result<()> {
        let mnemonic = mnemonic.trim().to_ascii_lowercase();
        if mnemonic.is_empty() || mnemonic == "*" {
            return Err(SynthError::InvalidBugPattern("empty mnemonic".to_string()));
        }
        if name.trim().is_empty() {
            return Err(SynthError::InvalidBugPattern(format!("bug for `{}` has no name", mnemonic)));
        }
        let tokens = pattern
            .iter()
            .map(|p| p.parse::<PatternToken>())
            .collect::<Result<Vec<_>>>()?;
        let bug = BugPattern {
            name: name.to_string(),
            tokens,
        };
        match mnemonic.strip_suffix('*') {
            Some(prefix) => self.prefixed.push((prefix.to_string(), bug)),
            None => self.exact.entry(mnemonic).or_default().push(bug),
        }
        Ok(())
    }

    pub fn add_csr(&mut self, name: &str) {
        self.csr_blacklist.insert(name.trim().to_ascii_lowercase());
    }

    pub fn csr_blacklist(&self) -> &HashSet<String> {
        &self.csr_blacklist
    }

    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.prefixed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First matching bug label: exact mnemonic entries first, then prefix
    /// entries in registration order.
    pub fn filter_known_bug(&self, opcode: &str, values: &[u64]) -> Option<&str> {
        let opcode = opcode.to_ascii_lowercase();
        if let Some(bug) = self
            .exact
            .get(&opcode)
            .and_then(|bugs| bugs.iter().find(|b| b.matches(values)))
        {
            return Some(&bug.name);
        }
        self.prefixed
            .iter()
            .find(|(prefix, b)| opcode.starts_with(prefix.as_str()) && b.matches(values))
            .map(|(_, b)| b.name.as_str())
    }

    /// Match against `dests ++ sources`.
    pub fn check(&self, opcode: &str, dest_values: &[u64], source_values: &[u64]) -> Option<&str> {
        let mut values = Vec::with_capacity(dest_values.len() + source_values.len());
        values.extend_from_slice(dest_values);
        values.extend_from_slice(source_values);
        self.filter_known_bug(opcode, &values)
    }

    /// Merge entries from a JSON registry:
    /// `{"bugs":[{"mnemonic","name","pattern":[...]}],"csr_blacklist":[...]}`.
    pub fn extend_from_json(&mut self, text: &str) -> Result<()> {
        let file: RegistryFile = serde_json::from_str(text)
            .map_err(|e| SynthError::Config(format!("bug registry: {}", e)))?;
        for entry in &file.bugs {
            let pattern: Vec<&str> = entry.pattern.iter().map(String::as_str).collect();
            self.add_bug(&entry.mnemonic, &entry.name, &pattern)?;
        }
        for csr in &file.csr_blacklist {
            self.add_csr(csr);
        }
        Ok(())
    }

    pub fn load_json(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.extend_from_json(&text)?;
        debug!(path = %path.display(), bugs = self.len(), csrs = self.csr_blacklist.len(), "merged bug registry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern_match() {
        let mut f = BugFilter::new();
        f.add_bug("div", "div by zero", &["*", "*", "0"]).unwrap();
        assert_eq!(f.check("div", &[5], &[7, 0]), Some("div by zero"));
        assert_eq!(f.check("div", &[5], &[7, 1]), None);
        assert_eq!(f.check("divu", &[5], &[7, 0]), None);
        // too few values to cover the pattern
        assert_eq!(f.filter_known_bug("div", &[1, 2]), None);
    }

    #[test]
    fn test_empty_pattern_is_unconditional() {
        let mut f = BugFilter::new();
        f.add_bug("wfi", "wfi is disabled", &[]).unwrap();
        assert_eq!(f.filter_known_bug("wfi", &[]), Some("wfi is disabled"));
        assert_eq!(f.filter_known_bug("WFI", &[1, 2, 3]), Some("wfi is disabled"));
    }

    #[test]
    fn test_exact_before_prefix() {
        let mut f = BugFilter::new();
        f.add_bug("fsqrt*", "sqrt family", &[]).unwrap();
        f.add_bug("fsqrt.s", "single inf", &["*", "0x7f7fffff"]).unwrap();
        assert_eq!(f.filter_known_bug("fsqrt.s", &[0, 0x7f7f_ffff]), Some("single inf"));
        assert_eq!(f.filter_known_bug("fsqrt.s", &[0, 1]), Some("sqrt family"));
        assert_eq!(f.filter_known_bug("fsqrt.d", &[]), Some("sqrt family"));
        assert_eq!(f.filter_known_bug("fadd.d", &[]), None);
    }

    #[test]
    fn test_invalid_tokens_rejected() {
        let mut f = BugFilter::new();
        let err = f.add_bug("add", "bad", &["a0"]).unwrap_err();
        assert!(matches!(err, SynthError::InvalidBugPattern(_)));
        assert!(f.add_bug("", "nameless", &[]).is_err());
        assert!(f.is_empty());
    }

    #[test]
    fn test_token_forms() {
        assert_eq!("*".parse::<PatternToken>().unwrap(), PatternToken::Any);
        assert_eq!("0x1F".parse::<PatternToken>().unwrap(), PatternToken::Value(31));
        assert_eq!("31".parse::<PatternToken>().unwrap(), PatternToken::Value(31));
        assert_eq!("-1".parse::<PatternToken>().unwrap(), PatternToken::Value(u64::MAX));
    }

    #[test]
    fn test_json_registry() {
        let mut f = BugFilter::for_target(TargetArch::Xs);
        assert!(f.is_empty());
        f.extend_from_json(
            r#"{"bugs":[{"mnemonic":"div","name":"div by zero","pattern":["*","0"]}],
                "csr_blacklist":["SATP"]}"#,
        )
        .unwrap();
        assert_eq!(f.len(), 1);
        assert_eq!(f.filter_known_bug("div", &[3, 0]), Some("div by zero"));
        assert!(f.csr_blacklist().contains("satp"));
        assert!(f.extend_from_json("{\"bugs\": 3}").is_err());
    }
}
