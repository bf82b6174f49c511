/// Conversation script parser
///
/// One command per line: `<connection> <verb> [argument]`. The argument is
/// the rest of the line, trailing newline included, so payloads keep their
/// line terminators. A line made only of `=` declares a barrier over every
/// connection known at that point.
use super::latch::Latch;
use super::{InteractError, InteractResult};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Unix,
}

#[derive(Clone, Debug)]
pub enum Command {
    Sleep(Duration),
    /// Wait for a barrier without taking part in it
    Wait(Arc<Latch>),
    /// Take part in a barrier
    Arrive(Arc<Latch>),
    Connect,
    Send(Vec<u8>),
    Recv(Vec<u8>),
    /// Half-close the writing direction
    StopWrite,
    /// Half-close the reading direction
    StopRead,
    /// Close the writer and expect EOF from the peer
    Done,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Sleep(d) => write!(f, "sleep, arg: {:?}", d.as_secs_f64()),
            Command::Wait(latch) => write!(f, "wait, arg: {}", latch),
            Command::Arrive(latch) => write!(f, "arrive, arg: {}", latch),
            Command::Connect => write!(f, "conn"),
            Command::Send(data) => write!(f, "send, arg: {}", super::show(data)),
            Command::Recv(data) => write!(f, "recv, arg: {}", super::show(data)),
            Command::StopWrite => write!(f, "stop"),
            Command::StopRead => write!(f, "rstop"),
            Command::Done => write!(f, "done"),
        }
    }
}

/// Script of one connection, in execution order
#[derive(Debug)]
pub struct ConnectionScript {
    pub name: String,
    pub transport: Transport,
    pub commands: VecDeque<Command>,
}

#[derive(Debug, Default)]
pub struct Script {
    pub connections: Vec<ConnectionScript>,
    pub latches: Vec<Arc<Latch>>,
}

impl Script {
    pub fn parse(text: &str) -> InteractResult<Self> {
        let mut script = Script::default();

        for line in text.split_inclusive('\n') {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('=') && line.trim_end().chars().all(|c| c == '=') {
                script.declare_barrier();
                continue;
            }

            let mut fields = line.splitn(3, ' ');
            let name = fields.next().unwrap_or_default();
            let verb = match fields.next() {
                Some(verb) => verb.trim_end_matches('\n'),
                None => return Err(crash(format!("empty cmd: {:?}", line))),
            };
            let arg = fields.next();

            match script.connections.iter().position(|c| c.name == name) {
                Some(idx) => {
                    let command = parse_command(name, verb, arg)?;
                    script.connections[idx].commands.push_back(command);
                }
                None => script.declare_connection(name, verb, arg)?,
            }
        }

        for connection in &mut script.connections {
            connection.commands.push_back(Command::Done);
        }
        Ok(script)
    }

    fn declare_barrier(&mut self) {
        let latch = Arc::new(Latch::new(self.latches.len(), self.connections.len()));
        for connection in &mut self.connections {
            connection.commands.push_back(Command::Arrive(latch.clone()));
        }
        self.latches.push(latch);
    }

    fn declare_connection(&mut self, name: &str, verb: &str, arg: Option<&str>) -> InteractResult<()> {
        if verb != "type" {
            return Err(crash(format!("{}: socket type is not specified", name)));
        }
        let kind = arg.map(|a| a.trim_end_matches('\n')).unwrap_or_default();
        let transport = match kind {
            "tcp" => Transport::Tcp,
            "unix" => Transport::Unix,
            other => return Err(crash(format!("{}: unknown socket type {:?}", name, other))),
        };

        let mut commands = VecDeque::new();
        if let Some(latch) = self.latches.last() {
            commands.push_back(Command::Wait(latch.clone()));
        }
        self.connections.push(ConnectionScript {
            name: name.to_string(),
            transport,
            commands,
        });
        Ok(())
    }
}

fn parse_command(name: &str, verb: &str, arg: Option<&str>) -> InteractResult<Command> {
    let required = || arg.ok_or_else(|| crash(format!("{}: {} requires an argument", name, verb)));
    let command = match verb {
        "sleep" => {
            let raw = required()?.trim();
            let secs = raw
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| crash(format!("{}: bad sleep duration {:?}", name, raw)))?;
            Command::Sleep(Duration::from_secs_f64(secs))
        }
        "conn" => Command::Connect,
        "send" => Command::Send(required()?.as_bytes().to_vec()),
        "recv" => Command::Recv(required()?.as_bytes().to_vec()),
        "stop" => Command::StopWrite,
        "rstop" => Command::StopRead,
        other => return Err(crash(format!("{}: unexpected method {}", name, other))),
    };
    Ok(command)
}

fn crash(message: String) -> InteractError {
    InteractError::Crash(message)
}
