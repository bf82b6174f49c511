/// Command-line and environment construction for one test run
use crate::config::metadata::TestConfig;
use crate::config::types::{HarnessError, Result, RunnerOptions, TestCase, PROBLEM_DIR_PLACEHOLDER};
use crate::safety::workspace::{absolute, RunDirectory};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Run-command word replaced by the test's parameters
const PARAMS_TOKEN: &str = "params";
/// Run-command word replaced by the test's path without extension
const TEST_NAME_TOKEN: &str = "test_name";

/// Fully expanded invocation of one candidate run
#[derive(Clone, Debug)]
pub struct RunContext {
    pub input: PathBuf,
    pub reference: PathBuf,
    pub info: PathBuf,
    pub run_dir: RunDirectory,
    /// Program actually executed
    pub executable: PathBuf,
    /// Argument vector as seen by the program, `argv[0]` included
    pub argv: Vec<String>,
    /// Complete environment of the candidate
    pub env: BTreeMap<String, String>,
    /// Shell-quoted command line for the log
    pub display: String,
}

impl RunContext {
    /// Expand the run command for `case` inside `run_dir`
    pub fn build(
        options: &RunnerOptions,
        config: &TestConfig,
        case: &TestCase,
        run_dir: RunDirectory,
    ) -> Result<Self> {
        let problem_dir = absolute(&options.problem_dir)?;
        let problem_dir_str = problem_dir.to_string_lossy().into_owned();
        let input_rel = run_dir.relative(&case.input)?;

        let mut params = replace_token(
            config.params.as_deref().unwrap_or(""),
            &options.input_filename,
            &input_rel,
        );
        if config.enable_subst {
            params = params.replace(PROBLEM_DIR_PLACEHOLDER, &problem_dir_str);
        }

        let test_path = format!("{}/{}", options.tests_dir.display(), case.name);
        let cmd = replace_token(&options.run_cmd, &options.input_filename, &input_rel)
            .replace(TEST_NAME_TOKEN, &test_path);

        let mut words = expand_words(&split(&cmd)?, &split(&params)?, &run_dir, &problem_dir)?;
        if let Some(user) = &options.user {
            let mut prefixed: Vec<String> = ["sudo", "-E", "-u", user.as_str()]
                .iter()
                .map(|w| w.to_string())
                .collect();
            prefixed.append(&mut words);
            words = prefixed;
        }
        if words.is_empty() {
            return Err(HarnessError::Config("Run command is empty".to_string()));
        }
        let display = join(&words);

        let executable = resolve_executable(&words[0], &run_dir);
        words[0] = Path::new(&words[0])
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| words[0].clone());
        if config.drop_first_param {
            words.remove(0);
            if words.is_empty() {
                return Err(HarnessError::Config(
                    "drop_first_param leaves an empty command line".to_string(),
                ));
            }
        }

        let mut env: BTreeMap<String, String> = if config.nuke_environ {
            BTreeMap::new()
        } else {
            std::env::vars().collect()
        };
        for (key, value) in &config.environ {
            let value = if config.enable_subst {
                value.replace(PROBLEM_DIR_PLACEHOLDER, &problem_dir_str)
            } else {
                value.clone()
            };
            env.insert(key.clone(), value);
        }

        Ok(RunContext {
            input: case.input.clone(),
            reference: case.reference.clone(),
            info: case.info.clone(),
            run_dir,
            executable,
            argv: words,
            env,
            display,
        })
    }
}

fn replace_token(text: &str, token: &str, with: &str) -> String {
    if token.is_empty() {
        text.to_string()
    } else {
        text.replace(token, with)
    }
}

/// Rewrite `./` words relative to the run directory and splice parameters in
/// place of the `params` word (or append them when it is absent)
fn expand_words(
    cmd: &[String],
    params: &[String],
    run_dir: &RunDirectory,
    problem_dir: &Path,
) -> Result<Vec<String>> {
    let params: Vec<String> = params
        .iter()
        .map(|p| p.replace("\\t", "\t").replace("\\n", "\n"))
        .collect();

    let mut words = Vec::with_capacity(cmd.len() + params.len());
    let mut spliced = false;
    for word in cmd {
        if word.starts_with("./") {
            words.push(run_dir.relative(&problem_dir.join(word))?);
        } else if word == PARAMS_TOKEN {
            words.extend(params.iter().cloned());
            spliced = true;
        } else {
            words.push(word.clone());
        }
    }
    if !spliced {
        words.extend(params);
    }
    Ok(words)
}

fn resolve_executable(word: &str, run_dir: &RunDirectory) -> PathBuf {
    let path = Path::new(word);
    if word.contains('/') && !path.is_absolute() {
        run_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

/// POSIX shell-like word splitting: quotes group, backslash escapes
pub fn split(text: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(unbalanced(text)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('\\' | '"' | '$' | '`')) => current.push(c),
                            Some('\n') => {}
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(unbalanced(text)),
                        },
                        Some(c) => current.push(c),
                        None => return Err(unbalanced(text)),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(c) => current.push(c),
                    None => {
                        return Err(HarnessError::Config(format!(
                            "No escaped character in {:?}",
                            text
                        )))
                    }
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unbalanced(text: &str) -> HarnessError {
    HarnessError::Config(format!("No closing quotation in {:?}", text))
}

/// Quote `word` so that [`split`] gives it back unchanged
pub fn quote(word: &str) -> String {
    if word.is_empty() {
        return "''".to_string();
    }
    let safe = word
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\"'\"'"))
    }
}

pub fn join(words: &[String]) -> String {
    words.iter().map(|w| quote(w)).collect::<Vec<_>>().join(" ")
}
