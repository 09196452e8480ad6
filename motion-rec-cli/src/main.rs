//! Record a stream whenever something moves in it

use clap::*;
use cv_source::{CvFrameCounter, CvReducer, CvSource};
use ffmpeg_capture::FfmpegCapture;
use log::*;
use motion_rec::prelude::v1::{Result, *};
use std::fmt::Display;
use std::str::FromStr;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("motion-rec")
        .version(crate_version!())
        .about("Records a stream whenever motion is detected in it. Type q and enter to quit.")
        .arg(
            Arg::new("stream")
                .long("stream")
                .short('s')
                .takes_value(true)
                .help("Address of the stream to watch"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .help("JSON file with the base configuration"),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .short('t')
                .takes_value(true),
        )
        .arg(Arg::new("start-frames").long("start-frames").takes_value(true))
        .arg(
            Arg::new("tail-length")
                .long("tail-length")
                .takes_value(true)
                .help("Seconds without motion before a recording stops"),
        )
        .arg(Arg::new("no-auto-delete").long("no-auto-delete"))
        .arg(
            Arg::new("testing")
                .long("testing")
                .help("Detect motion without recording"),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .short('o')
                .takes_value(true),
        )
        .arg(
            Arg::new("queue-capacity")
                .long("queue-capacity")
                .takes_value(true)
                .help("Frames to buffer before dropping the oldest, 0 for unbounded"),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .takes_value(true)
                .help("Framerate to assume when the stream does not report one"),
        )
        .get_matches();

    let config = load_config(&matches)?;

    let shutdown = Shutdown::new();
    let pipeline = Pipeline::new(config.clone(), shutdown.clone())?;

    let source = CvSource::try_new(&config.source)?;
    let capture = FfmpegCapture::new(config.launch_probe(), config.stop_timeout());

    let listener = quit::listen(shutdown.clone())?;

    let result = pipeline.run(
        source,
        Box::new(CvReducer::default()),
        Box::new(capture),
        Box::new(CvFrameCounter),
    );

    shutdown.trigger();

    if let Some(listener) = listener {
        let _ = listener.join();
    }

    report(&result?);

    Ok(())
}

fn parse<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T::Err: Display,
{
    matches
        .value_of(name)
        .map(|v| {
            v.parse()
                .map_err(|e| anyhow!("invalid --{name} value {v:?}: {e}"))
        })
        .transpose()
}

/// Base configuration from the JSON file, overridden by command line flags.
fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config: Config = match matches.value_of("config") {
        Some(path) => {
            let file = std::fs::File::open(path)
                .map_err(|e| anyhow!("cannot open config {path}: {e}"))?;
            serde_json::from_reader(std::io::BufReader::new(file))?
        }
        None => Config::default(),
    };

    if let Some(stream) = matches.value_of("stream") {
        config.source = stream.to_string();
    }

    if let Some(threshold) = parse(matches, "threshold")? {
        config.threshold = threshold;
    }

    if let Some(start_frames) = parse(matches, "start-frames")? {
        config.start_frames = start_frames;
    }

    if let Some(tail_length) = parse(matches, "tail-length")? {
        config.tail_length = tail_length;
    }

    if matches.is_present("no-auto-delete") {
        config.auto_delete = false;
    }

    if matches.is_present("testing") {
        config.testing = true;
    }

    if let Some(output_dir) = matches.value_of("output-dir") {
        config.output_dir = output_dir.into();
    }

    if let Some(capacity) = parse(matches, "queue-capacity")? {
        config.queue_capacity = capacity;
    }

    if let Some(fps) = parse(matches, "fps")? {
        config.fps = Some(fps);
    }

    config.validate()
}

fn report(summary: &RunSummary) {
    for session in &summary.sessions {
        match session.disposition {
            Disposition::Kept { frames: Some(frames) } => {
                info!("kept {} ({frames} frames)", session.path.display())
            }
            Disposition::Kept { frames: None } => info!("kept {}", session.path.display()),
            Disposition::Deleted { frames } => {
                info!("deleted {} ({frames} frames)", session.path.display())
            }
        }
    }

    for failure in &summary.failures {
        error!("{failure}");
    }

    if let Some(e) = &summary.ingest_error {
        error!("stream lost: {e}");
    }

    info!(
        "read {} frames, analysed {}, skipped {}, dropped {}",
        summary.frames_read, summary.frames_analyzed, summary.frames_skipped, summary.frames_dropped
    );
}

#[cfg(unix)]
mod quit {
    use log::*;
    use motion_rec::prelude::v1::Shutdown;
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::io::{self, BufRead};
    use std::os::fd::AsFd;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    const POLL_MS: u16 = 100;

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_sigint(_: nix::libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    /// Watch for a `q` line on stdin or SIGINT.
    pub fn listen(shutdown: Shutdown) -> io::Result<Option<JoinHandle<()>>> {
        let action = SigAction::new(
            SigHandler::Handler(on_sigint),
            SaFlags::empty(),
            SigSet::empty(),
        );

        // SAFETY: the handler only touches an atomic.
        unsafe { sigaction(Signal::SIGINT, &action) }?;

        thread::Builder::new()
            .name("quit".into())
            .spawn(move || watch(shutdown))
            .map(Some)
    }

    fn watch(shutdown: Shutdown) {
        let stdin = io::stdin();
        let mut stdin_open = true;
        let mut line = String::new();

        while shutdown.is_running() {
            if INTERRUPTED.load(Ordering::SeqCst) {
                info!("interrupted, stopping");
                shutdown.trigger();
                break;
            }

            if !stdin_open {
                thread::sleep(Duration::from_millis(POLL_MS.into()));
                continue;
            }

            let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];

            match poll(&mut fds, PollTimeout::from(POLL_MS)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!("cannot watch stdin: {e}");
                    stdin_open = false;
                    continue;
                }
            }

            line.clear();

            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    debug!("stdin closed");
                    stdin_open = false;
                }
                Ok(_) if line.trim() == "q" => {
                    info!("quit requested");
                    shutdown.trigger();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("cannot read stdin: {e}");
                    stdin_open = false;
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod quit {
    use log::*;
    use motion_rec::prelude::v1::Shutdown;
    use std::io::{self, BufRead};
    use std::thread::{self, JoinHandle};

    /// Watch for a `q` line on stdin.
    ///
    /// Blocking stdin reads cannot be interrupted here, so the thread is left detached.
    pub fn listen(shutdown: Shutdown) -> io::Result<Option<JoinHandle<()>>> {
        thread::Builder::new().name("quit".into()).spawn(move || {
            for line in io::stdin().lock().lines().map_while(|l| l.ok()) {
                if line.trim() == "q" {
                    info!("quit requested");
                    shutdown.trigger();
                    break;
                }
            }
        })?;

        Ok(None)
    }
}
