//! Per-test metadata (`T.inf`) parsing.
//!
//! The format is line oriented: `key = value` pairs or bare flag tokens.
//! The key set is closed; anything unknown is rejected so that a typo in a
//! fixture never silently changes how a test runs.

use crate::config::types::{HarnessError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Bare tokens accepted as boolean flags
const FLAGS: [&str; 4] = ["enable_subst", "check_stderr", "nuke_environ", "drop_first_param"];

/// Expected exit status of the candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCodePattern {
    /// The exit code must equal this value
    Exact(i32),
    /// Any exit code except zero (`!0`)
    AnyNonzero,
}

impl ExitCodePattern {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "!0" {
            return Ok(ExitCodePattern::AnyNonzero);
        }
        raw.parse::<i32>()
            .map(ExitCodePattern::Exact)
            .map_err(|_| HarnessError::Config(format!("Unsupported exit_code pattern {raw:?}")))
    }

    pub fn matches(&self, code: i32) -> bool {
        match self {
            ExitCodePattern::Exact(expected) => *expected == code,
            ExitCodePattern::AnyNonzero => code != 0,
        }
    }
}

impl std::fmt::Display for ExitCodePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCodePattern::Exact(code) => write!(f, "{code}"),
            ExitCodePattern::AnyNonzero => write!(f, "!0"),
        }
    }
}

/// Typed view of one test's metadata record
#[derive(Clone, Debug, PartialEq)]
pub struct TestConfig {
    /// Extra command-line parameters (shell syntax)
    pub params: Option<String>,
    /// Environment overlay for the candidate
    pub environ: BTreeMap<String, String>,
    /// Additional overlay for the interactor
    pub interactor_env: BTreeMap<String, String>,
    /// Per-test override of the default time limit
    pub time_limit: Option<Duration>,
    pub exit_code: ExitCodePattern,
    /// RLIMIT_NPROC ceiling, applied in pipeline mode only
    pub max_process_count: Option<u64>,
    pub enable_subst: bool,
    pub check_stderr: bool,
    pub nuke_environ: bool,
    pub drop_first_param: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            params: None,
            environ: BTreeMap::new(),
            interactor_env: BTreeMap::new(),
            time_limit: None,
            exit_code: ExitCodePattern::Exact(0),
            max_process_count: None,
            enable_subst: false,
            check_stderr: false,
            nuke_environ: false,
            drop_first_param: false,
        }
    }
}

impl TestConfig {
    /// Load metadata from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(TestConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| match e {
            HarnessError::Config(msg) => {
                HarnessError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config = TestConfig::default();
        let mut seen_exit_code = false;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = line.split_once(" = ") {
                config.apply(key, value.trim(), &mut seen_exit_code)?;
            } else if line.ends_with(" =") {
                continue;
            } else if FLAGS.contains(&line) {
                config.set_flag(line);
            } else {
                return Err(HarnessError::Config(format!("Unknown param '{line}'")));
            }
        }

        Ok(config)
    }

    /// Time limit of this test, falling back to the environment default
    pub fn time_limit_or(&self, default: Duration) -> Duration {
        self.time_limit.unwrap_or(default)
    }

    fn apply(&mut self, key: &str, value: &str, seen_exit_code: &mut bool) -> Result<()> {
        match key {
            "params" => {
                if self.params.is_some() {
                    return Err(HarnessError::Config("Duplicated params".to_string()));
                }
                self.params = Some(value.to_string());
            }
            "environ" | "compiler_env" => parse_env(value, &mut self.environ)?,
            "interactor_env" => parse_env(value, &mut self.interactor_env)?,
            "comment" => {}
            "time_limit_ms" | "real_time_limit_ms" => {
                let ms = value.parse::<u64>().map_err(|_| {
                    HarnessError::Config(format!("Invalid {key} = {value}"))
                })?;
                self.time_limit = Some(Duration::from_millis(ms));
            }
            "exit_code" => {
                if *seen_exit_code {
                    return Err(HarnessError::Config("Duplicated exit_code".to_string()));
                }
                *seen_exit_code = true;
                self.exit_code = ExitCodePattern::parse(value)?;
            }
            "max_process_count" => {
                let count = value.parse::<u64>().map_err(|_| {
                    HarnessError::Config(format!("Invalid max_process_count = {value}"))
                })?;
                self.max_process_count = Some(count);
            }
            // Memory limits are enforced by the grading system, not here
            "max_vm_size" | "max_rss_size" => {}
            _ => {
                return Err(HarnessError::Config(format!(
                    "Unknown inf param {key} = {value}"
                )))
            }
        }
        Ok(())
    }

    fn set_flag(&mut self, flag: &str) {
        match flag {
            "enable_subst" => self.enable_subst = true,
            "check_stderr" => self.check_stderr = true,
            "nuke_environ" => self.nuke_environ = true,
            "drop_first_param" => self.drop_first_param = true,
            _ => unreachable!("flag list and match arms diverged"),
        }
    }
}

/// Parse an environment overlay value.
///
/// Either a single quoted assignment (`"KEY=value with spaces"`) or a
/// whitespace separated list of `KEY=value` words.
fn parse_env(value: &str, env: &mut BTreeMap<String, String>) -> Result<()> {
    if value.trim().is_empty() {
        return Ok(());
    }

    if let Some(quoted) = value.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or_else(|| HarnessError::Config(format!("Unsupported env {value:?}")))?;
        let (key, val) = split_assignment(inner, value)?;
        env.insert(key.to_string(), val.to_string());
        return Ok(());
    }

    for word in value.split_whitespace() {
        let (key, val) = split_assignment(word, value)?;
        env.insert(key.to_string(), val.to_string());
    }
    Ok(())
}

fn split_assignment<'a>(word: &'a str, whole: &str) -> Result<(&'a str, &'a str)> {
    match word.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key, val)),
        _ => Err(HarnessError::Config(format!("Unsupported env {whole:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metadata_defaults() {
        let config = TestConfig::parse("\n  \n").unwrap();
        assert_eq!(config, TestConfig::default());
        assert_eq!(config.exit_code, ExitCodePattern::Exact(0));
    }

    #[test]
    fn test_full_record() {
        let text = "\
params = 8080 /tmp/chat.sock
environ = A=1 B=two
compiler_env = \"GREETING=hello world\"
interactor_env = MODE=strict
comment = anything goes here
time_limit_ms = 2500
exit_code = !0
max_process_count = 16
max_vm_size = 1G
enable_subst
check_stderr
nuke_environ
drop_first_param
";
        let config = TestConfig::parse(text).unwrap();
        assert_eq!(config.params.as_deref(), Some("8080 /tmp/chat.sock"));
        assert_eq!(config.environ.get("A").map(String::as_str), Some("1"));
        assert_eq!(config.environ.get("B").map(String::as_str), Some("two"));
        assert_eq!(
            config.environ.get("GREETING").map(String::as_str),
            Some("hello world")
        );
        assert_eq!(
            config.interactor_env.get("MODE").map(String::as_str),
            Some("strict")
        );
        assert_eq!(config.time_limit, Some(Duration::from_millis(2500)));
        assert_eq!(config.exit_code, ExitCodePattern::AnyNonzero);
        assert_eq!(config.max_process_count, Some(16));
        assert!(config.enable_subst);
        assert!(config.check_stderr);
        assert!(config.nuke_environ);
        assert!(config.drop_first_param);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = TestConfig::parse("timelimit = 5").unwrap_err();
        assert!(matches!(err, HarnessError::Config(msg) if msg.contains("timelimit")));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(TestConfig::parse("enable_substitution").is_err());
    }

    #[test]
    fn test_duplicated_params_rejected() {
        assert!(TestConfig::parse("params = 1\nparams = 2").is_err());
        assert!(TestConfig::parse("exit_code = 1\nexit_code = 2").is_err());
    }

    #[test]
    fn test_empty_value_line_is_skipped() {
        let config = TestConfig::parse("params =\nenviron =").unwrap();
        assert!(config.params.is_none());
        assert!(config.environ.is_empty());
    }

    #[test]
    fn test_bad_env_rejected() {
        assert!(TestConfig::parse("environ = NOEQUALS").is_err());
        assert!(TestConfig::parse("environ = \"A=unterminated").is_err());
    }

    #[test]
    fn test_time_limit_fallback() {
        let config = TestConfig::default();
        assert_eq!(
            config.time_limit_or(Duration::from_secs(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_exit_code_pattern() {
        assert!(ExitCodePattern::Exact(0).matches(0));
        assert!(!ExitCodePattern::Exact(0).matches(1));
        assert!(ExitCodePattern::AnyNonzero.matches(3));
        assert!(ExitCodePattern::AnyNonzero.matches(-9));
        assert!(!ExitCodePattern::AnyNonzero.matches(0));
        assert_eq!(ExitCodePattern::parse(" 42 ").unwrap(), ExitCodePattern::Exact(42));
        assert!(ExitCodePattern::parse("1..3").is_err());
        assert_eq!(ExitCodePattern::AnyNonzero.to_string(), "!0");
    }
}
