//! # ffmpeg recording backend
//!
//! Every recording is a separate `ffmpeg` process with its own connection to the stream. It
//! copies the streams without re-encoding, so recordings keep the source quality no matter how
//! coarse the motion analysis is.
//!
//! ffmpeg finalizes its output when it reads `q` on stdin, which is how recordings are stopped.

use log::*;
use motion_rec::prelude::v1::{Capture, CaptureHandle};
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Builds the ffmpeg command line for a lossless stream copy.
#[derive(Clone, Debug)]
pub struct CopyCommand {
    program: PathBuf,
    source: String,
    output: PathBuf,
}

impl CopyCommand {
    pub fn new(program: impl Into<PathBuf>, source: &str, output: &Path) -> Self {
        Self {
            program: program.into(),
            source: source.to_string(),
            output: output.to_path_buf(),
        }
    }

    /// Whether the source is an RTSP stream, which gets forced onto TCP.
    fn is_rtsp(&self) -> bool {
        let source = self.source.to_ascii_lowercase();
        source.starts_with("rtsp://") || source.starts_with("rtsps://")
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-y".into()];

        if self.is_rtsp() {
            args.extend(
                ["-rtsp_transport", "tcp", "-rtsp_flags", "prefer_tcp"]
                    .into_iter()
                    .map(OsString::from),
            );
        }

        args.extend(
            ["-i", self.source.as_str(), "-c", "copy"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(self.output.clone().into_os_string());

        args
    }

    pub fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args());
        command
    }
}

/// Launches one ffmpeg process per recording.
#[derive(Clone, Debug)]
pub struct FfmpegCapture {
    program: PathBuf,
    probe: Duration,
    stop_timeout: Duration,
}

impl FfmpegCapture {
    /// # Arguments
    ///
    /// * `probe` - how long ffmpeg must keep running after spawning to count as started.
    /// * `stop_timeout` - how long to wait for ffmpeg to finalize before killing it.
    pub fn new(probe: Duration, stop_timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            probe,
            stop_timeout,
        }
    }

    /// Use a specific ffmpeg binary instead of the one in `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Capture for FfmpegCapture {
    fn start(&self, source: &str, output: &Path) -> io::Result<Box<dyn CaptureHandle>> {
        let command = CopyCommand::new(&self.program, source, output).build();
        debug!("launching {command:?}");
        FfmpegProcess::spawn(command, self.probe, self.stop_timeout).map(|p| Box::new(p) as _)
    }
}

/// Running ffmpeg child.
pub struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<()>>,
    stop_timeout: Duration,
    // Status of an exit that happened before a stop was requested.
    exited: Option<ExitStatus>,
}

impl FfmpegProcess {
    /// Spawn the command and make sure it survives the startup probe.
    pub fn spawn(mut command: Command, probe: Duration, stop_timeout: Duration) -> io::Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();

        let stderr = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    debug!("ffmpeg: {line}");
                }
            })
        });

        let mut process = Self {
            child,
            stdin,
            stderr,
            stop_timeout,
            exited: None,
        };

        if let Some(status) = wait_timeout(&mut process.child, probe)? {
            process.join_stderr();
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ffmpeg exited during startup ({status})"),
            ));
        }

        Ok(process)
    }

    fn join_stderr(&mut self) {
        if let Some(stderr) = self.stderr.take() {
            let _ = stderr.join();
        }
    }

    #[cfg(unix)]
    fn interrupt(&self) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGINT)?;
        debug!("sent SIGINT to ffmpeg");
        Ok(())
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "cannot interrupt ffmpeg on this platform",
        ))
    }
}

impl CaptureHandle for FfmpegProcess {
    fn terminate(&mut self) -> io::Result<()> {
        if let Some(status) = self.child.try_wait()? {
            warn!("ffmpeg already exited ({status})");
            self.exited = Some(status);
            return Ok(());
        }

        // Dropping stdin afterwards gives ffmpeg an EOF as well.
        let sent = match self.stdin.take() {
            Some(mut stdin) => stdin.write_all(b"q").and_then(|_| stdin.flush()),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed")),
        };

        if let Err(e) = sent {
            warn!("could not ask ffmpeg to quit ({e}), interrupting");
            self.interrupt()?;
        }

        Ok(())
    }

    fn join(self: Box<Self>) -> io::Result<()> {
        let mut this = *self;

        let waited = match wait_timeout(&mut this.child, this.stop_timeout) {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                warn!(
                    "ffmpeg did not exit within {:?}, killing it",
                    this.stop_timeout
                );
                this.child.kill()?;
                this.child.wait()?;
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "ffmpeg had to be killed",
                ))
            }
            Err(e) => Err(e),
        };

        this.join_stderr();

        let status = waited?;

        if let Some(early) = this.exited.filter(|s| !s.success()) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ffmpeg died while recording ({early})"),
            ));
        }

        if !status.success() {
            warn!("ffmpeg exited with {status}");
        }

        Ok(())
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Wait for the child to exit for at most `timeout`.
fn wait_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let elapsed = start.elapsed();

        if elapsed >= timeout {
            return Ok(None);
        }

        thread::sleep(std::cmp::min(POLL_INTERVAL, timeout - elapsed));
    }
}
