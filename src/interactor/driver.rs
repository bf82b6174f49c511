/// Interactor scheduler and process entry point
use super::connection::{Connection, Endpoints};
use super::script::Script;
use super::{ConversationLog, InteractError, InteractResult, InteractorOutcome};
use crate::kernel::signal;
use log::{debug, error};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Time given to the candidate to bind its sockets
const STARTUP_DELAY: Duration = Duration::from_millis(100);

/// Positional arguments of the interactor process
#[derive(Clone, Debug)]
pub struct InteractorArgs {
    /// Conversation script (the test's input fixture)
    pub script: PathBuf,
    /// Conversation log destination
    pub output: PathBuf,
    pub reference: PathBuf,
    /// Candidate to terminate once the conversation ends
    pub pid: Option<i32>,
    /// Metadata record whose `params` hold `<port> <unix socket path>`
    pub info: Option<PathBuf>,
}

/// Run every connection concurrently; the first failure wins and aborts the rest
pub async fn drive(script: Script, endpoints: Endpoints, log: ConversationLog) -> InteractResult<()> {
    let endpoints = Arc::new(endpoints);
    let mut tasks = JoinSet::new();
    for connection in script.connections {
        let connection = Connection::new(connection, endpoints.clone(), log.clone());
        tasks.spawn(connection.run());
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(InteractError::Crash(format!("Connection task failed: {}", e)));
            }
        }
    }
    Ok(())
}

/// Lenient `key = value` reader for the interactor's metadata record
pub fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

/// Candidate endpoints from the `params` entry of the metadata record
pub fn endpoints_from_info(info: &HashMap<String, String>) -> InteractResult<Endpoints> {
    let params = info.get("params").map(String::as_str).unwrap_or_default();
    let mut words = params.split_whitespace();
    let port = words
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| InteractError::Crash(format!("Bad port in params {:?}", params)))?;
    let unix_path = words
        .next()
        .ok_or_else(|| InteractError::Crash(format!("No unix socket path in params {:?}", params)))?;
    Ok(Endpoints::new(port, unix_path))
}

fn load_endpoints(info: Option<&Path>) -> InteractResult<Endpoints> {
    let path = info.ok_or_else(|| InteractError::Crash("No metadata record given".to_string()))?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| InteractError::Crash(format!("Failed to read {}: {}", path.display(), e)))?;
    endpoints_from_info(&parse_info(&text))
}

fn converse(args: &InteractorArgs, log: &ConversationLog) -> InteractResult<()> {
    let endpoints = load_endpoints(args.info.as_deref())?;
    let text = std::fs::read_to_string(&args.script).map_err(|e| {
        InteractError::Crash(format!("Failed to read {}: {}", args.script.display(), e))
    })?;
    let script = Script::parse(&text)?;
    debug!(
        "{} connections, {} barriers",
        script.connections.len(),
        script.latches.len()
    );

    std::thread::sleep(STARTUP_DELAY);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| InteractError::Crash(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(drive(script, endpoints, log.clone()))
}

/// Run the interactor end to end and report its outcome
pub fn run_interactor(args: &InteractorArgs) -> InteractorOutcome {
    if let Err(e) = signal::ignore_sigpipe() {
        error!("Failed to ignore SIGPIPE: {}", e);
    }

    let log = ConversationLog::default();
    let outcome = match converse(args, &log) {
        Ok(()) => InteractorOutcome::Ok,
        Err(e) => {
            match &e {
                InteractError::Crash(message) => error!("{}", message),
                other => log.raw(format!("{}\n", other).as_bytes()),
            }
            e.outcome()
        }
    };

    if let Some(pid) = args.pid {
        if let Err(e) = signal::terminate(Pid::from_raw(pid)) {
            debug!("Failed to terminate {}: {}", pid, e);
        }
    }

    // Whatever the candidate printed outside the sockets
    let mut rest = Vec::new();
    if let Err(e) = std::io::stdin().read_to_end(&mut rest) {
        debug!("Failed to drain stdin: {}", e);
    }
    log.raw(&rest);

    if let Err(e) = std::fs::write(&args.output, log.contents()) {
        error!("Failed to write {}: {}", args.output.display(), e);
        return InteractorOutcome::Crash;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_parsing_is_lenient() {
        let info = parse_info("params = 8080 /tmp/chat.sock\n\ncomment=anything goes\nflag\n");
        assert_eq!(info["params"], "8080 /tmp/chat.sock");
        assert_eq!(info["comment"], "anything goes");
        assert_eq!(info["flag"], "");
    }

    #[test]
    fn test_endpoints_from_params() {
        let info = parse_info("params = 8080 /tmp/chat.sock");
        let endpoints = endpoints_from_info(&info).unwrap();
        assert_eq!(endpoints.tcp.port(), 8080);
        assert!(endpoints.tcp.ip().is_loopback());
        assert_eq!(endpoints.unix_path, PathBuf::from("/tmp/chat.sock"));
    }

    #[test]
    fn test_missing_params_is_a_crash() {
        let err = endpoints_from_info(&parse_info("params = 8080")).unwrap_err();
        assert_eq!(err.outcome(), InteractorOutcome::Crash);
        assert!(endpoints_from_info(&HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_empty_script_succeeds() {
        let script = Script::parse("# nothing\n").unwrap();
        let endpoints = Endpoints::new(1, "/nonexistent");
        assert!(drive(script, endpoints, ConversationLog::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_unix_connection_is_presentation_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script::parse("a type unix\na send hi\n").unwrap();
        let endpoints = Endpoints::new(1, dir.path().join("absent.sock"));
        let err = drive(script, endpoints, ConversationLog::default()).await.unwrap_err();
        assert_eq!(err.outcome(), InteractorOutcome::PresentationError);
    }
}
