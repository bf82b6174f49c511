/// One scripted client connection
///
/// Starts unconnected, connects on the first command that touches the socket
/// and then executes its queue strictly in order.
use super::script::{Command, ConnectionScript, Transport};
use super::{show, ConversationLog, InteractError, InteractResult};
use nix::sys::socket::{shutdown, Shutdown};
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

/// Bytes read when checking for EOF at the end of a conversation
const TAIL_PROBE: usize = 10;

/// Where the candidate listens
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub tcp: SocketAddr,
    pub unix_path: PathBuf,
}

impl Endpoints {
    /// Candidate TCP port on the IPv6 loopback plus its Unix socket path
    pub fn new(port: u16, unix_path: impl Into<PathBuf>) -> Self {
        Endpoints {
            tcp: SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port),
            unix_path: unix_path.into(),
        }
    }
}

trait Stream: AsyncRead + AsyncWrite + AsRawFd + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + AsRawFd + Unpin + Send> Stream for T {}

pub struct Connection {
    name: String,
    transport: Transport,
    endpoints: Arc<Endpoints>,
    queue: VecDeque<Command>,
    stream: Option<Box<dyn Stream>>,
    writer_closed: bool,
    reader_closed: bool,
    log: ConversationLog,
}

impl Connection {
    pub fn new(script: ConnectionScript, endpoints: Arc<Endpoints>, log: ConversationLog) -> Self {
        Connection {
            name: script.name,
            transport: script.transport,
            endpoints,
            queue: script.commands,
            stream: None,
            writer_closed: false,
            reader_closed: false,
            log,
        }
    }

    fn log(&self, message: &str) {
        self.log.line(&self.name, message);
    }

    fn transport_error(&self, e: io::Error) -> InteractError {
        InteractError::Presentation(format!("{}: {}", self.name, e))
    }

    fn wrong_answer(&self, message: String) -> InteractError {
        self.log(&message);
        InteractError::WrongAnswer(format!("{}: {}", self.name, message))
    }

    /// Execute the whole queue
    pub async fn run(mut self) -> InteractResult<()> {
        while let Some(command) = self.queue.pop_front() {
            self.log(&format!("method: {}", command));
            match command {
                Command::Sleep(duration) => tokio::time::sleep(duration).await,
                Command::Wait(latch) => latch.wait().await,
                Command::Arrive(latch) => latch.arrive_and_wait().await?,
                Command::Connect => {
                    self.stream().await?;
                }
                Command::Send(data) => self.send(&data).await?,
                Command::Recv(expected) => self.recv(&expected).await?,
                Command::StopWrite => self.close_writer().await?,
                Command::StopRead => self.close_reader().await?,
                Command::Done => {
                    self.close_writer().await?;
                    if !self.reader_closed {
                        self.expect_eof().await?;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn stream(&mut self) -> InteractResult<&mut Box<dyn Stream>> {
        if self.stream.is_none() {
            self.log("starting connection");
            let stream: Box<dyn Stream> = match self.transport {
                Transport::Tcp => Box::new(
                    TcpStream::connect(self.endpoints.tcp)
                        .await
                        .map_err(|e| self.transport_error(e))?,
                ),
                Transport::Unix => Box::new(
                    UnixStream::connect(&self.endpoints.unix_path)
                        .await
                        .map_err(|e| self.transport_error(e))?,
                ),
            };
            self.stream = Some(stream);
            self.log("started connection");
        }
        self.stream
            .as_mut()
            .ok_or_else(|| InteractError::Crash("connection vanished".to_string()))
    }

    async fn send(&mut self, data: &[u8]) -> InteractResult<()> {
        if self.writer_closed {
            return Err(self.wrong_answer("Cannot send(), writer is closed".to_string()));
        }
        let result = {
            let stream = self.stream().await?;
            match stream.write_all(data).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            }
        };
        result.map_err(|e| self.transport_error(e))
    }

    async fn recv(&mut self, expected: &[u8]) -> InteractResult<()> {
        if self.reader_closed {
            return Err(self.wrong_answer("Cannot recv(), reader is closed".to_string()));
        }
        let mut received = vec![0u8; expected.len()];
        let mut filled = 0;
        let read_result = {
            let stream = self.stream().await?;
            loop {
                if filled == received.len() {
                    break Ok(());
                }
                match stream.read(&mut received[filled..]).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => filled += n,
                    Err(e) => break Err(e),
                }
            }
        };
        read_result.map_err(|e| self.transport_error(e))?;
        received.truncate(filled);
        self.log(&format!("received: {}", show(&received)));

        if filled < expected.len() {
            return Err(InteractError::Presentation(format!(
                "{}: Unexpected EOF (expected {} bytes, got {})",
                self.name,
                expected.len(),
                filled
            )));
        }
        if received != expected {
            return Err(InteractError::WrongAnswer(format!(
                "{}: Incorrect data (expected {}, received {})",
                self.name,
                show(expected),
                show(&received)
            )));
        }
        Ok(())
    }

    async fn close_writer(&mut self) -> InteractResult<()> {
        if self.writer_closed {
            return Ok(());
        }
        let result = self.stream().await?.shutdown().await;
        result.map_err(|e| self.transport_error(e))?;
        self.writer_closed = true;
        Ok(())
    }

    async fn close_reader(&mut self) -> InteractResult<()> {
        if self.reader_closed {
            return Ok(());
        }
        let fd = self.stream().await?.as_raw_fd();
        shutdown(fd, Shutdown::Read).map_err(|e| self.transport_error(e.into()))?;
        self.reader_closed = true;
        Ok(())
    }

    async fn expect_eof(&mut self) -> InteractResult<()> {
        let mut tail = [0u8; TAIL_PROBE];
        let result = self.stream().await?.read(&mut tail).await;
        let n = result.map_err(|e| self.transport_error(e))?;
        self.log(&format!("tail: {}", show(&tail[..n])));
        if n > 0 {
            return Err(InteractError::WrongAnswer(format!(
                "{}: Garbage data ({}) where EOF was expected",
                self.name,
                show(&tail[..n])
            )));
        }
        Ok(())
    }
}
