/// Output checkers
/// A checker selector is resolved once per suite into a closed variant set;
/// every built-in variant is a pure comparison over (produced, reference).
use crate::config::types::{HarnessError, Result, DIRENT_ENV, PROBLEM_DIR_PLACEHOLDER};
use crate::safety::workspace::absolute;
use crate::verdict::diff::{split_lines, unified_diff};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// File in the run directory that keeps the produced output after a failure
pub const FAILED_OUTPUT_FILE: &str = "output";

/// Token lists longer than this are not echoed in mismatch messages
const MAX_ECHOED_TOKENS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Checker {
    /// `cmp`: byte equality, unified diff on mismatch
    Exact,
    /// `sorted-lines`: equality up to line order
    SortedLines,
    /// `cmp-double`: one number within `EPS`
    Double,
    /// `cmp-double-seq`: whitespace-separated numbers, each within `EPS`
    DoubleSeq,
    /// `ignore-spaces`: token equality
    IgnoreSpaces,
    /// `ignore`: anything goes, exit code is not checked either
    Ignore,
    /// Any selector containing `/`: external checker program
    External(PathBuf),
}

/// Why a built-in comparison failed
#[derive(Clone, Debug, PartialEq)]
pub struct Mismatch {
    pub message: String,
    /// Unified diff for line-based checkers
    pub diff: Option<String>,
}

impl Mismatch {
    fn plain(message: impl Into<String>) -> Self {
        Mismatch {
            message: message.into(),
            diff: None,
        }
    }
}

/// Everything a checker may need about one finished run
#[derive(Clone, Debug)]
pub struct CheckRequest<'a> {
    pub test_name: &'a str,
    pub info: &'a Path,
    pub input: &'a Path,
    pub reference: &'a Path,
    /// Produced-output file handed to external checkers, relative to `run_dir`
    pub output_file: &'a str,
    pub exit_code: i32,
    pub problem_dir: &'a Path,
    pub fixture_dir: &'a Path,
    pub run_dir: &'a Path,
    pub eps: f64,
}

impl Checker {
    /// Resolve a `--checker` selector
    pub fn from_selector(selector: &str) -> Result<Self> {
        let checker = match selector {
            "cmp" => Checker::Exact,
            "sorted-lines" => Checker::SortedLines,
            "cmp-double" => Checker::Double,
            "cmp-double-seq" => Checker::DoubleSeq,
            "ignore-spaces" => Checker::IgnoreSpaces,
            "ignore" => Checker::Ignore,
            path if path.contains('/') => Checker::External(absolute(Path::new(path))?),
            other => {
                return Err(HarnessError::Config(format!("Unknown checker {}", other)));
            }
        };
        Ok(checker)
    }

    pub fn is_external(&self) -> bool {
        matches!(self, Checker::External(_))
    }

    /// Whether the candidate's exit code is verified at all
    pub fn checks_exit_code(&self) -> bool {
        !matches!(self, Checker::Ignore)
    }

    /// Pure comparison for built-in checkers; external checkers always match here
    pub fn compare(&self, produced: &[u8], reference: &[u8], eps: f64) -> std::result::Result<(), Mismatch> {
        match self {
            Checker::Exact => compare_lines(split_lines(reference), split_lines(produced)),
            Checker::SortedLines => {
                let mut expected = split_lines(trim_ascii(reference));
                let mut actual = split_lines(trim_ascii(produced));
                expected.sort_unstable();
                actual.sort_unstable();
                compare_lines(expected, actual)
            }
            Checker::Double => {
                let res = parse_double(produced)?;
                let ans = parse_double(reference)?;
                if !within_eps(res, ans, eps) {
                    return Err(Mismatch::plain(format!("{:?} != {:?} for EPS={:?}", res, ans, eps)));
                }
                Ok(())
            }
            Checker::DoubleSeq => {
                let res: Vec<&[u8]> = produced.split(u8::is_ascii_whitespace).filter(|t| !t.is_empty()).collect();
                let ans: Vec<&[u8]> = reference.split(u8::is_ascii_whitespace).filter(|t| !t.is_empty()).collect();
                if res.len() != ans.len() {
                    return Err(Mismatch::plain(format!(
                        "Sequence length mismatch: {} vs {}",
                        res.len(),
                        ans.len()
                    )));
                }
                for (i, (r, a)) in res.iter().zip(&ans).enumerate() {
                    let (r, a) = (parse_double(r)?, parse_double(a)?);
                    if !within_eps(r, a, eps) {
                        return Err(Mismatch::plain(format!(
                            "Element #{} mismatch: {:?} != {:?}, EPS={:?}",
                            i + 1,
                            r,
                            a,
                            eps
                        )));
                    }
                }
                Ok(())
            }
            Checker::IgnoreSpaces => {
                let res_text = String::from_utf8_lossy(produced);
                let ans_text = String::from_utf8_lossy(reference);
                let res: Vec<&str> = res_text.split_whitespace().collect();
                let ans: Vec<&str> = ans_text.split_whitespace().collect();
                if res != ans {
                    let mut message = String::from("Tokens differ.");
                    if res.len() <= MAX_ECHOED_TOKENS && ans.len() <= MAX_ECHOED_TOKENS {
                        message.push_str(&format!(" Expected: {:?}, actual: {:?}", ans, res));
                    }
                    return Err(Mismatch::plain(message));
                }
                Ok(())
            }
            Checker::Ignore | Checker::External(_) => Ok(()),
        }
    }

    /// Check one run; mismatches become candidate failures
    pub fn check(&self, request: &CheckRequest<'_>, produced: &[u8]) -> Result<()> {
        match self {
            Checker::External(program) => run_external(program, request),
            Checker::Ignore => Ok(()),
            builtin => {
                let reference = load_reference(request.reference, request.problem_dir)?;
                match builtin.compare(produced, &reference, request.eps) {
                    Ok(()) => Ok(()),
                    Err(mismatch) => {
                        if let Some(diff) = &mismatch.diff {
                            print!("{}", diff);
                        }
                        fs::write(request.run_dir.join(FAILED_OUTPUT_FILE), produced)?;
                        Err(HarnessError::Candidate(format!(
                            "Output mismatched on test {}: {}. Check \"{}\" file",
                            request.test_name,
                            mismatch.message,
                            request.run_dir.join(FAILED_OUTPUT_FILE).display()
                        )))
                    }
                }
            }
        }
    }
}

/// Read a reference answer with the problem-directory placeholder expanded
pub fn load_reference(path: &Path, problem_dir: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path).map_err(|e| {
        HarnessError::Config(format!("Failed to read reference {}: {}", path.display(), e))
    })?;
    Ok(replace_bytes(
        &raw,
        PROBLEM_DIR_PLACEHOLDER.as_bytes(),
        problem_dir.as_os_str().as_encoded_bytes(),
    ))
}

fn run_external(program: &Path, request: &CheckRequest<'_>) -> Result<()> {
    let args = [
        request.info.display().to_string(),
        request.input.display().to_string(),
        request.output_file.to_string(),
        request.reference.display().to_string(),
        request.exit_code.to_string(),
    ];
    println!("{} {}", program.display(), args.join(" "));

    let status = Command::new(program)
        .args(&args)
        .current_dir(request.run_dir)
        .env(DIRENT_ENV, request.problem_dir.join(request.fixture_dir))
        .stdin(Stdio::null())
        .status()
        .map_err(|e| {
            HarnessError::Config(format!("Failed to start checker {}: {}", program.display(), e))
        })?;

    debug!("Checker {} exited with {}", program.display(), status);
    if status.success() {
        Ok(())
    } else {
        Err(HarnessError::Candidate(format!("Test {} failed", request.test_name)))
    }
}

fn compare_lines(expected: Vec<&[u8]>, actual: Vec<&[u8]>) -> std::result::Result<(), Mismatch> {
    if expected == actual {
        return Ok(());
    }
    Err(Mismatch {
        message: "lines differ".to_string(),
        diff: Some(unified_diff(&expected, &actual)),
    })
}

fn within_eps(res: f64, ans: f64, eps: f64) -> bool {
    res == ans || (res - ans).abs() <= eps
}

fn trim_ascii(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &data[start..end]
}

fn replace_bytes(haystack: &[u8], needle: &[u8], with: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = rest.windows(needle.len()).position(|w| w == needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(with);
        rest = &rest[pos + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Parse one number, accepting `0x` hex-float notation
pub fn parse_double(data: &[u8]) -> std::result::Result<f64, Mismatch> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Mismatch::plain("Output is not valid UTF-8"))?
        .trim();
    let parsed = if text.starts_with("0x") || text.starts_with("0X") {
        parse_hex_float(&text[2..])
    } else {
        text.parse::<f64>().ok()
    };
    parsed.ok_or_else(|| Mismatch::plain(format!("Could not convert {:?} to float", text)))
}

/// `<hex digits>[.<hex digits>][p<decimal exponent>]` without the `0x` prefix
fn parse_hex_float(text: &str) -> Option<f64> {
    let (mantissa, exponent) = match text.find(['p', 'P']) {
        Some(pos) => (&text[..pos], text[pos + 1..].parse::<i32>().ok()?),
        None => (text, 0),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    // Exact integer mantissa; digits past 120 bits only feed a sticky bit
    let mut mantissa_bits = 0u128;
    let mut scale = 0i64;
    let mut sticky = false;
    let digits = int_part
        .chars()
        .map(|c| (c, false))
        .chain(frac_part.chars().map(|c| (c, true)));
    for (c, fractional) in digits {
        let digit = c.to_digit(16)?;
        if mantissa_bits >> 116 == 0 {
            mantissa_bits = (mantissa_bits << 4) | u128::from(digit);
            if fractional {
                scale -= 4;
            }
        } else {
            if !fractional {
                scale += 4;
            }
            sticky |= digit != 0;
        }
    }
    if sticky {
        mantissa_bits |= 1;
    }

    // u128 -> f64 rounds once, to nearest even
    let value = mantissa_bits as f64;
    let shift = i64::from(exponent) + scale;
    Some(scale_by_power_of_two(value, shift))
}

fn scale_by_power_of_two(mut value: f64, mut shift: i64) -> f64 {
    const STEP: i64 = 1000;
    while shift > STEP && value.is_finite() && value != 0.0 {
        value *= 2f64.powi(STEP as i32);
        shift -= STEP;
    }
    while shift < -STEP && value != 0.0 {
        value *= 2f64.powi(-STEP as i32);
        shift += STEP;
    }
    value * 2f64.powi(shift as i32)
}
