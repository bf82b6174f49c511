/// Fixture discovery: `T.dat`, `T.ans`, `T.inf`, `T.dir` or a suite-wide `static`
use crate::config::types::{HarnessError, Result, TestCase};
use crate::safety::workspace::absolute;
use std::fs;
use std::io;
use std::path::Path;

/// Suite-wide fixture directory, relative to the problem directory
pub const STATIC_DIR_NAME: &str = "static";

/// All `*.dat` fixtures of `tests_dir`, sorted by path
pub fn discover(problem_dir: &Path, tests_dir: &Path) -> Result<Vec<TestCase>> {
    let dir = absolute(&problem_dir.join(tests_dir))?;
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut inputs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "dat") && path.is_file() {
            inputs.push(path);
        }
    }
    inputs.sort();

    let static_dir = absolute(&problem_dir.join(STATIC_DIR_NAME))?;
    let static_dir = static_dir.is_dir().then_some(static_dir);

    inputs
        .iter()
        .map(|input| test_case(input, static_dir.as_deref()))
        .collect()
}

fn test_case(input: &Path, static_dir: Option<&Path>) -> Result<TestCase> {
    let name = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| HarnessError::Internal(format!("{} has no file name", input.display())))?;

    let own_dir = input.with_extension("dir");
    let fixture_dir = match static_dir {
        Some(shared) => {
            if own_dir.is_dir() {
                return Err(HarnessError::Config(format!(
                    "Test {} has its own {} while a {} directory exists",
                    name,
                    own_dir.display(),
                    STATIC_DIR_NAME
                )));
            }
            shared.to_path_buf()
        }
        None => own_dir,
    };

    Ok(TestCase {
        name,
        input: input.to_path_buf(),
        reference: input.with_extension("ans"),
        info: input.with_extension("inf"),
        fixture_dir,
    })
}
