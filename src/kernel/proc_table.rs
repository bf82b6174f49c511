/// Process table enumeration through `/proc`
use crate::config::types::{HarnessError, Result};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One row of the process table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub ppid: i32,
    /// Single-letter scheduler state from `/proc/<pid>/stat` (`R`, `S`, `Z`, ...)
    pub state: char,
    pub cmdline: Vec<String>,
}

impl ProcessEntry {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

impl std::fmt::Display for ProcessEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {:?})", self.pid, self.cmdline)
    }
}

/// Reader over a procfs mount
#[derive(Clone, Debug)]
pub struct ProcTable {
    root: PathBuf,
}

impl Default for ProcTable {
    fn default() -> Self {
        ProcTable {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcTable {
    /// Use an alternative procfs root (tests point this at a fixture tree)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        ProcTable { root: root.into() }
    }

    /// Read a single entry; processes may vanish between listing and reading
    pub fn read_entry(&self, pid: i32) -> Result<ProcessEntry> {
        let dir = self.root.join(pid.to_string());
        let stat = fs::read(dir.join("stat"))?;
        let (state, ppid) = parse_stat(&stat).ok_or_else(|| {
            HarnessError::Internal(format!("malformed {}/stat", dir.display()))
        })?;
        let cmdline = read_cmdline(&dir.join("cmdline"));
        Ok(ProcessEntry {
            pid,
            ppid,
            state,
            cmdline,
        })
    }

    /// All processes whose parent is `parent`
    pub fn children_of(&self, parent: Pid) -> Result<Vec<ProcessEntry>> {
        let mut children = Vec::new();
        for entry in fs::read_dir(&self.root)?.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            match self.read_entry(pid) {
                Ok(proc_entry) if proc_entry.ppid == parent.as_raw() => children.push(proc_entry),
                _ => {}
            }
        }
        children.sort_by_key(|e| e.pid);
        Ok(children)
    }

    /// First child of `parent`, polling while it is being spawned.
    ///
    /// Needed when the candidate runs behind `sudo`: the interesting pid is
    /// the child of the process we started.
    pub fn wait_for_child(&self, parent: Pid, attempts: u32, delay: Duration) -> Result<Pid> {
        for _ in 0..attempts {
            let children = self.children_of(parent)?;
            if let Some(child) = children.iter().find(|c| !c.is_zombie()) {
                return Ok(Pid::from_raw(child.pid));
            }
            std::thread::sleep(delay);
        }
        Err(HarnessError::Internal(format!(
            "No child process of {parent} found"
        )))
    }
}

/// Extract `(state, ppid)` from the contents of `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so parsing starts after the last `)`.
fn parse_stat(stat: &[u8]) -> Option<(char, i32)> {
    let close = stat.iter().rposition(|&b| b == b')')?;
    let rest = std::str::from_utf8(stat.get(close + 2..)?).ok()?;
    let mut fields = rest.split_ascii_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((state, ppid))
}

fn read_cmdline(path: &Path) -> Vec<String> {
    let Ok(raw) = fs::read(path) else {
        return Vec::new();
    };
    raw.split(|&b| b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_proc(root: &Path, pid: i32, stat: &str, cmdline: &[u8]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("stat"), stat).unwrap();
        fs::write(dir.join("cmdline"), cmdline).unwrap();
    }

    #[test]
    fn test_parse_stat_with_tricky_comm() {
        let stat = b"4242 (evil) (name) S 17 4242 4242 0 -1 4194560";
        assert_eq!(parse_stat(stat), Some(('S', 17)));
        assert_eq!(parse_stat(b"garbage"), None);
    }

    #[test]
    fn test_children_of_fixture_tree() {
        let dir = tempfile::tempdir().unwrap();
        write_proc(dir.path(), 10, "10 (sh) S 1 10 10", b"sh\0-c\0sleep 5\0");
        write_proc(dir.path(), 11, "11 (sleep) S 10 10 10", b"sleep\x005\x00");
        write_proc(dir.path(), 12, "12 (dead) Z 10 10 10", b"");
        write_proc(dir.path(), 13, "13 (other) S 99 13 13", b"other\0");
        fs::create_dir_all(dir.path().join("self")).unwrap();

        let table = ProcTable::with_root(dir.path());
        let children = table.children_of(Pid::from_raw(10)).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].pid, 11);
        assert_eq!(children[0].cmdline, vec!["sleep", "5"]);
        assert!(children[1].is_zombie());
        assert_eq!(children[0].to_string(), "(11, [\"sleep\", \"5\"])");
    }

    #[test]
    fn test_wait_for_child_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let table = ProcTable::with_root(dir.path());
        let err = table
            .wait_for_child(Pid::from_raw(77), 2, Duration::from_millis(1))
            .unwrap_err();
        assert!(err.to_string().contains("No child process of 77"));
    }

    #[test]
    fn test_read_own_entry() {
        let table = ProcTable::default();
        let me = table.read_entry(std::process::id() as i32).unwrap();
        assert_eq!(me.ppid, nix::unistd::getppid().as_raw());
        assert!(!me.cmdline.is_empty());
    }
}
