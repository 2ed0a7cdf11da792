//! OpenSSH remote-shell client.
//!
//! Runs the system `ssh` binary under a pseudo-terminal. The remote side is
//! asked to print [`READY_MARKER`] before it execs the login shell, so the
//! marker is the first thing we see once the transport is up and the user is
//! authenticated. Everything before it (banners, prompts, errors) is kept as
//! the failure message if ssh exits early.
//!
//! Passwords never appear on the command line: ssh is pointed at the gateway
//! binary as its `SSH_ASKPASS` helper and the secret travels in the helper's
//! environment.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};

use super::client::{
    ChannelEvent, ChannelEvents, ClientError, ClientFactory, ConnectParams, OpenedShell,
    PtyRequest, RemoteShellClient, ShellChannel, CHANNEL_EVENT_CAPACITY,
};
use crate::askpass;

/// Printed by the remote side right before the login shell starts.
pub const READY_MARKER: &[u8] = b"\x1b]5379;webshell-ready\x07";

/// Remote command: announce readiness, then become the user's login shell.
const REMOTE_COMMAND: &str = r#"printf '\033]5379;webshell-ready\007'; exec "${SHELL:-/bin/sh}" -l"#;

/// Buffer size for reading from the PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Input chunks queued for the writer thread.
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Upper bound on output kept while waiting for the marker.
const PREAMBLE_LIMIT: usize = 16 * 1024;

/// errno reported by the PTY master once the slave side is gone.
const EIO: i32 = 5;

/// How the `ssh` binary is invoked.
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Path or name of the ssh binary.
    pub binary: PathBuf,
    /// Value for `-o StrictHostKeyChecking=`.
    pub strict_host_key_checking: String,
    /// Extra arguments inserted before the destination.
    pub extra_args: Vec<String>,
    /// `TERM` exported to the remote shell.
    pub term: String,
    /// Program ssh runs to obtain a password.
    pub askpass_program: Option<PathBuf>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            strict_host_key_checking: "accept-new".to_string(),
            extra_args: Vec::new(),
            term: "xterm-256color".to_string(),
            askpass_program: std::env::current_exe().ok(),
        }
    }
}

impl SshSettings {
    /// Builds the ssh invocation for one session.
    pub fn command(&self, params: &ConnectParams) -> Result<CommandBuilder, ClientError> {
        let mut cmd = CommandBuilder::new(&self.binary);
        cmd.arg("-tt");
        cmd.arg("-p");
        cmd.arg(params.port.to_string());
        cmd.arg("-o");
        cmd.arg(format!(
            "StrictHostKeyChecking={}",
            self.strict_host_key_checking
        ));
        cmd.arg("-o");
        cmd.arg("ServerAliveInterval=30");

        match &params.password {
            Some(password) => {
                let helper = self.askpass_program.as_ref().ok_or_else(|| {
                    ClientError::Connect("no askpass helper for password authentication".into())
                })?;
                cmd.arg("-o");
                cmd.arg("NumberOfPasswordPrompts=1");
                cmd.env("SSH_ASKPASS", helper);
                cmd.env("SSH_ASKPASS_REQUIRE", "force");
                if std::env::var_os("DISPLAY").is_none() {
                    cmd.env("DISPLAY", "webshell:0");
                }
                cmd.env(askpass::SECRET_ENV, password);
            }
            None => {
                cmd.arg("-o");
                cmd.arg("BatchMode=yes");
            }
        }

        for arg in &self.extra_args {
            cmd.arg(arg);
        }

        cmd.arg("-l");
        cmd.arg(&params.username);
        cmd.arg("--");
        cmd.arg(&params.host);
        cmd.arg(REMOTE_COMMAND);
        cmd.env("TERM", &self.term);
        Ok(cmd)
    }
}

/// Creates [`OpenSshClient`]s sharing one set of settings.
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    settings: Arc<SshSettings>,
}

impl OpenSshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }
}

impl ClientFactory for OpenSshConnector {
    type Client = OpenSshClient;

    fn create(&self) -> OpenSshClient {
        OpenSshClient {
            settings: Arc::clone(&self.settings),
            pending: None,
        }
    }
}

/// A running ssh process. Dropping it kills the process.
struct Process {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                tracing::debug!(error = %e, "Failed to kill ssh process");
            }
            let _ = self.child.wait();
        }
    }
}

/// A connected ssh process whose channel has not been handed out yet.
struct Pending {
    process: Process,
    writer: Box<dyn Write + Send>,
    events: ChannelEvents,
}

/// One ssh process driven through a PTY.
pub struct OpenSshClient {
    settings: Arc<SshSettings>,
    pending: Option<Pending>,
}

impl RemoteShellClient for OpenSshClient {
    type Channel = OpenSshChannel;

    async fn connect(&mut self, params: &ConnectParams) -> Result<(), ClientError> {
        self.pending = None;

        let pair = native_pty_system()
            .openpty(pty_size(80, 24))
            .map_err(|e| ClientError::Connect(format!("failed to open PTY: {e}")))?;

        let cmd = self.settings.command(params)?;
        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            ClientError::Connect(format!(
                "failed to spawn {}: {e}",
                self.settings.binary.display()
            ))
        })?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let process = Process {
            master: pair.master,
            child,
        };

        let (events_tx, events) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        thread::Builder::new()
            .name("ssh-reader".into())
            .spawn(move || read_loop(reader, ready_tx, events_tx))?;

        tracing::debug!(
            host = %params.host,
            port = params.port,
            username = %params.username,
            "Spawned ssh, waiting for shell"
        );

        match ready_rx.await {
            Ok(Ok(())) => {
                self.pending = Some(Pending {
                    process,
                    writer,
                    events,
                });
                Ok(())
            }
            Ok(Err(output)) => Err(classify_failure(&output)),
            Err(_) => Err(ClientError::Connect("ssh reader stopped unexpectedly".into())),
        }
    }

    async fn open_shell(
        &mut self,
        pty: &PtyRequest,
    ) -> Result<OpenedShell<OpenSshChannel>, ClientError> {
        let Pending {
            process,
            writer,
            events,
        } = self
            .pending
            .take()
            .ok_or_else(|| ClientError::Shell("not connected".into()))?;

        process
            .master
            .resize(pty_size(pty.cols, pty.rows))
            .map_err(|e| ClientError::Shell(e.to_string()))?;

        let (input, queued) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        thread::Builder::new()
            .name("ssh-writer".into())
            .spawn(move || write_loop(writer, queued))?;

        Ok(OpenedShell {
            channel: OpenSshChannel {
                process: Some(process),
                input: Some(input),
            },
            events,
        })
    }

    async fn disconnect(&mut self) {
        self.pending = None;
    }
}

/// Outbound half of an ssh session.
///
/// Input is handed to a writer thread so a peer that stops reading never
/// blocks the session's task.
pub struct OpenSshChannel {
    process: Option<Process>,
    input: Option<mpsc::Sender<Bytes>>,
}

impl OpenSshChannel {
    fn process(&mut self) -> Result<&mut Process, String> {
        self.process.as_mut().ok_or_else(|| "channel closed".to_string())
    }
}

impl ShellChannel for OpenSshChannel {
    async fn write(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| ClientError::Write("channel closed".into()))?;
        input
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| ClientError::Write("ssh input closed".into()))
    }

    async fn resize(&mut self, cols: u16, rows: u16) -> Result<(), ClientError> {
        let process = self.process().map_err(ClientError::Resize)?;
        process
            .master
            .resize(pty_size(cols, rows))
            .map_err(|e| ClientError::Resize(e.to_string()))
    }

    async fn close(&mut self) {
        self.input = None;
        self.process = None;
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Returns the offset just past the ready marker, if present.
fn find_marker(output: &[u8]) -> Option<usize> {
    output
        .windows(READY_MARKER.len())
        .position(|window| window == READY_MARKER)
        .map(|start| start + READY_MARKER.len())
}

fn is_hangup(error: &std::io::Error) -> bool {
    error.raw_os_error() == Some(EIO)
}

/// Maps the output of an ssh process that exited before the marker.
fn classify_failure(output: &str) -> ClientError {
    let summary = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("ssh exited before the shell started")
        .to_string();

    if output.contains("Permission denied") || output.contains("Too many authentication failures")
    {
        ClientError::Auth(summary)
    } else {
        ClientError::Connect(summary)
    }
}

/// Writes queued input to the PTY until the queue closes or a write fails.
fn write_loop(mut writer: Box<dyn Write + Send>, mut input: mpsc::Receiver<Bytes>) {
    while let Some(data) = input.blocking_recv() {
        if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
            tracing::debug!(error = %e, "PTY write failed");
            return;
        }
    }
}

/// Reads the PTY until it closes.
///
/// Signals `ready` once the marker is seen (or with the captured output if
/// the stream ends first), then forwards everything after it as data.
fn read_loop(
    mut reader: Box<dyn Read + Send>,
    ready: oneshot::Sender<Result<(), String>>,
    events: mpsc::Sender<ChannelEvent>,
) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut preamble = Vec::new();
    let mut ready = Some(ready);

    let failure = loop {
        let chunk = match reader.read(&mut buffer) {
            Ok(0) => break None,
            Ok(n) => &buffer[..n],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_hangup(&e) => break None,
            Err(e) => break Some(e.to_string()),
        };

        let Some(tx) = ready.take() else {
            let data = Bytes::copy_from_slice(chunk);
            if events.blocking_send(ChannelEvent::Data(data)).is_err() {
                return;
            }
            continue;
        };

        preamble.extend_from_slice(chunk);
        match find_marker(&preamble) {
            Some(end) => {
                if tx.send(Ok(())).is_err() {
                    return;
                }
                let rest = preamble.split_off(end);
                preamble = Vec::new();
                if !rest.is_empty()
                    && events
                        .blocking_send(ChannelEvent::Data(Bytes::from(rest)))
                        .is_err()
                {
                    return;
                }
            }
            None => {
                if preamble.len() > PREAMBLE_LIMIT {
                    let excess = preamble.len() - PREAMBLE_LIMIT;
                    preamble.drain(..excess);
                }
                ready = Some(tx);
            }
        }
    };

    match ready {
        Some(tx) => {
            let mut output = String::from_utf8_lossy(&preamble).into_owned();
            if let Some(message) = failure {
                output.push('\n');
                output.push_str(&message);
            }
            let _ = tx.send(Err(output));
        }
        None => {
            let event = match failure {
                None => ChannelEvent::Closed,
                Some(message) => ChannelEvent::Error(message),
            };
            let _ = events.blocking_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn argv(cmd: &CommandBuilder) -> Vec<String> {
        cmd.get_argv()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn settings() -> SshSettings {
        SshSettings {
            askpass_program: Some(PathBuf::from("/usr/local/bin/webshell-gateway")),
            ..SshSettings::default()
        }
    }

    #[test]
    fn test_command_with_password_uses_askpass() {
        let params = ConnectParams::new("10.0.0.5", 2222, "root").with_password("hunter2");
        let cmd = settings().command(&params).unwrap();
        let args = argv(&cmd);

        assert_eq!(args[0], "ssh");
        assert!(args.contains(&"-tt".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-l", "root"]));
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(!args.contains(&"BatchMode=yes".to_string()));
        assert!(args.iter().all(|arg| !arg.contains("hunter2")));

        assert_eq!(
            cmd.get_env(askpass::SECRET_ENV),
            Some(OsStr::new("hunter2"))
        );
        assert_eq!(cmd.get_env("SSH_ASKPASS_REQUIRE"), Some(OsStr::new("force")));
        assert_eq!(
            cmd.get_env("SSH_ASKPASS"),
            Some(OsStr::new("/usr/local/bin/webshell-gateway"))
        );
    }

    #[test]
    fn test_command_without_password_is_batch_mode() {
        let params = ConnectParams::new("example.org", 22, "deploy");
        let cmd = settings().command(&params).unwrap();
        let args = argv(&cmd);

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(cmd.get_env(askpass::SECRET_ENV).is_none());
        assert_eq!(cmd.get_env("TERM"), Some(OsStr::new("xterm-256color")));
    }

    #[test]
    fn test_command_ends_with_destination_and_remote_command() {
        let mut settings = settings();
        settings.extra_args = vec!["-o".into(), "ConnectTimeout=5".into()];
        let params = ConnectParams::new("example.org", 22, "deploy");
        let args = argv(&settings.command(&params).unwrap());

        let n = args.len();
        assert_eq!(args[n - 3], "--");
        assert_eq!(args[n - 2], "example.org");
        assert_eq!(args[n - 1], REMOTE_COMMAND);
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
    }

    #[test]
    fn test_password_without_helper_fails() {
        let settings = SshSettings {
            askpass_program: None,
            ..SshSettings::default()
        };
        let params = ConnectParams::new("h", 22, "u").with_password("pw");
        assert!(matches!(
            settings.command(&params),
            Err(ClientError::Connect(_))
        ));
    }

    #[test]
    fn test_find_marker() {
        let mut output = b"Warning: Permanently added 'h' to known hosts.\r\n".to_vec();
        assert_eq!(find_marker(&output), None);
        output.extend_from_slice(READY_MARKER);
        let end = output.len();
        output.extend_from_slice(b"$ ");
        assert_eq!(find_marker(&output), Some(end));
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure("root@10.0.0.5: Permission denied (publickey,password).\r\n");
        assert!(matches!(err, ClientError::Auth(ref m) if m.starts_with("root@10.0.0.5")));

        let err = classify_failure("ssh: connect to host 10.0.0.9 port 22: Connection refused\r\n");
        assert!(matches!(err, ClientError::Connect(ref m) if m.ends_with("Connection refused")));

        let err = classify_failure("");
        assert!(matches!(err, ClientError::Connect(ref m) if m.contains("exited")));
    }

    /// Yields the given chunks, then fails like a hung-up PTY.
    struct Chunks(Vec<Vec<u8>>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Err(std::io::Error::from_raw_os_error(EIO));
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_read_loop_forwards_output_after_marker() {
        let (ready_tx, mut ready_rx) = oneshot::channel();
        let (events_tx, mut events) = mpsc::channel(16);

        let marker_split = READY_MARKER.len() / 2;
        let mut first = b"banner\r\n".to_vec();
        first.extend_from_slice(&READY_MARKER[..marker_split]);
        let mut second = READY_MARKER[marker_split..].to_vec();
        second.extend_from_slice(b"motd");

        let reader = Chunks(vec![first, second, b"$ ".to_vec()]);
        read_loop(Box::new(reader), ready_tx, events_tx);

        assert!(matches!(ready_rx.try_recv(), Ok(Ok(()))));
        assert_eq!(
            events.try_recv().unwrap(),
            ChannelEvent::Data(Bytes::from_static(b"motd"))
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ChannelEvent::Data(Bytes::from_static(b"$ "))
        );
        assert_eq!(events.try_recv().unwrap(), ChannelEvent::Closed);
    }

    #[test]
    fn test_read_loop_reports_output_when_ssh_exits_early() {
        let (ready_tx, mut ready_rx) = oneshot::channel();
        let (events_tx, mut events) = mpsc::channel(16);

        let reader = Cursor::new(b"root@h: Permission denied (password).\r\n".to_vec());
        read_loop(Box::new(reader), ready_tx, events_tx);

        match ready_rx.try_recv() {
            Ok(Err(output)) => assert!(output.contains("Permission denied")),
            other => panic!("unexpected readiness: {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    /// Collects everything written into a shared buffer.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Fails every write like a PTY whose process is gone.
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from_raw_os_error(EIO))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_loop_writes_in_order_until_queue_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Bytes::from_static(b"ls ")).unwrap();
        tx.try_send(Bytes::from_static(b"-la\n")).unwrap();
        drop(tx);

        let out = Shared::default();
        write_loop(Box::new(out.clone()), rx);
        assert_eq!(out.0.lock().unwrap().as_slice(), b"ls -la\n");
    }

    #[test]
    fn test_write_loop_stops_on_failure() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(Bytes::from_static(b"a")).unwrap();
        tx.try_send(Bytes::from_static(b"b")).unwrap();

        write_loop(Box::new(Broken), rx);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_channel_write_queues_without_touching_the_pty() {
        let (input, mut queued) = mpsc::channel(4);
        let mut channel = OpenSshChannel {
            process: None,
            input: Some(input),
        };

        channel.write(b"whoami\n").await.unwrap();
        assert_eq!(queued.recv().await.unwrap(), Bytes::from_static(b"whoami\n"));

        drop(queued);
        assert!(matches!(
            channel.write(b"x").await,
            Err(ClientError::Write(_))
        ));

        channel.close().await;
        assert!(matches!(
            channel.write(b"x").await,
            Err(ClientError::Write(ref m)) if m == "channel closed"
        ));
    }
}
