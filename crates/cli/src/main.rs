mod script;

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;

use framewatch_core::animation::bounds_interpolator::BoundsInterpolator;
use framewatch_core::animation::infrastructure::thread_scheduler::ThreadScheduler;
use framewatch_core::animation::scheduler::Scheduler;
use framewatch_core::detection::domain::detection::{Detection, DetectionKind, LandmarkKind};
use framewatch_core::graphic::bounds_scaler::BoundsScaler;
use framewatch_core::graphic::overlay::Overlay;
use framewatch_core::pipeline::detection_coordinator::{AnalyzeOutcome, DetectionCoordinator};
use framewatch_core::pipeline::infrastructure::worker_pool::WorkerPool;
use framewatch_core::settings::Settings;
use framewatch_core::shared::geometry::Size;
use framewatch_core::stream::operators::StreamExt;
use framewatch_core::stream::vision_stream::Connection;
use framewatch_core::video::domain::frame_source::FrameSource;
use framewatch_core::video::infrastructure::image_directory_source::ImageDirectorySource;
use framewatch_core::video::infrastructure::synthetic_source::SyntheticFrameSource;

use crate::script::ReplayScript;

/// Concurrent frame detection with smoothed, display-mapped results.
#[derive(Parser)]
#[command(name = "framewatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay recorded detections through the live pipeline and print the
    /// smoothed results as JSON lines.
    Replay(ReplayArgs),
}

#[derive(clap::Args)]
struct ReplayArgs {
    /// JSON replay script.
    script: PathBuf,

    /// Directory of images to use as frames instead of blank ones.
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Settings file (defaults to the user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Detector worker threads.
    #[arg(long)]
    workers: Option<usize>,

    /// Give up waiting for a frame's detectors after this many milliseconds.
    #[arg(long)]
    join_deadline_ms: Option<u64>,

    /// Overlay size as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_size)]
    overlay: Option<Size>,

    /// Mirror bounds horizontally, as for a front camera.
    #[arg(long)]
    front_camera: bool,
}

#[derive(Serialize)]
struct Emitted<'a> {
    t_ms: u64,
    #[serde(flatten)]
    detection: &'a Detection,
}

#[derive(Default)]
struct Tally {
    completed: usize,
    dropped: usize,
    timed_out: usize,
    published: usize,
    failed: usize,
}

impl Tally {
    fn record(&mut self, outcome: AnalyzeOutcome) {
        match outcome {
            AnalyzeOutcome::Completed { published, failed } => {
                self.completed += 1;
                self.published += published;
                self.failed += failed;
            }
            AnalyzeOutcome::Dropped => self.dropped += 1,
            AnalyzeOutcome::TimedOut { .. } => self.timed_out += 1,
            AnalyzeOutcome::NoDetectors | AnalyzeOutcome::ShutDown => {}
        }
    }

    /// Joins the delivery threads that have finished, or all of them when
    /// `wait_all` is set, and records their outcomes.
    fn reap(&mut self, in_flight: &mut Vec<JoinHandle<AnalyzeOutcome>>, wait_all: bool) {
        let (done, running): (Vec<_>, Vec<_>) = in_flight
            .drain(..)
            .partition(|handle| wait_all || handle.is_finished());
        *in_flight = running;
        for handle in done {
            match handle.join() {
                Ok(outcome) => self.record(outcome),
                Err(_) => log::error!("Frame delivery thread panicked"),
            }
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay(args) => run_replay(args),
    }
}

fn run_replay(args: ReplayArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings(&args)?;
    let script = ReplayScript::load(&args.script)?;

    let pool = match settings.worker_threads() {
        Some(threads) => WorkerPool::new(threads)?,
        None => WorkerPool::with_default_size()?,
    };
    let coordinator = Arc::new(
        DetectionCoordinator::new(pool).with_join_deadline(settings.join_deadline()),
    );
    for (&kind, detector) in &script.detectors {
        coordinator.register(Arc::new(detector.build(kind)));
        if !detector.enabled {
            coordinator.disable(kind);
        }
    }

    let scheduler: Arc<dyn Scheduler> = Arc::new(ThreadScheduler::new("framewatch-animation")?);
    let overlay = Arc::new(Overlay::new(settings.overlay, settings.front_camera));
    let started = Instant::now();
    let connections: Vec<Box<dyn Connection>> = DetectionKind::ALL
        .iter()
        .map(|&kind| connect_output(&coordinator, kind, &overlay, &scheduler, &settings, started))
        .collect();

    let mut source = open_source(&args, &script);
    let metadata = source.open()?;
    let interval = metadata
        .frame_interval()
        .unwrap_or(Duration::from_secs_f64(1.0 / script.frames.fps));
    log::info!(
        "Replaying {} frames ({}x{}, {:?}) at {:.1} fps",
        metadata.total_frames,
        metadata.width,
        metadata.height,
        metadata.rotation,
        script.frames.fps
    );

    // Each frame is delivered from its own thread, like a camera callback,
    // so frames arriving during a dispatch are really dropped.
    let mut tally = Tally::default();
    let mut in_flight = Vec::new();
    for (index, frame) in source.frames().enumerate() {
        let frame = frame?;
        let coordinator = coordinator.clone();
        in_flight.push(
            thread::Builder::new()
                .name(format!("framewatch-frame-{index}"))
                .spawn(move || coordinator.analyze(frame))?,
        );
        tally.reap(&mut in_flight, false);
        thread::sleep(interval);
    }
    source.close();
    tally.reap(&mut in_flight, true);

    // Let the last animations and lost-object timers play out.
    let config = settings.interpolator();
    thread::sleep(config.animation_duration + config.lost_object_duration);
    for connection in &connections {
        connection.disconnect();
    }
    coordinator.shutdown();

    log::info!(
        "Admitted {} frames, dropped {}, timed out {}; {} detections published, {} detector failures",
        tally.completed,
        tally.dropped,
        tally.timed_out,
        tally.published,
        tally.failed
    );
    Ok(())
}

fn load_settings(args: &ReplayArgs) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };
    if let Some(workers) = args.workers {
        settings.worker_threads = workers;
    }
    if let Some(deadline) = args.join_deadline_ms {
        settings.join_deadline_ms = Some(deadline);
    }
    if let Some(overlay) = args.overlay {
        settings.overlay = overlay;
    }
    if args.front_camera {
        settings.front_camera = true;
    }
    Ok(settings)
}

fn open_source(args: &ReplayArgs, script: &ReplayScript) -> Box<dyn FrameSource> {
    let frames = &script.frames;
    match &args.frames {
        Some(dir) => Box::new(ImageDirectorySource::new(dir, frames.fps, frames.rotation)),
        None => Box::new(SyntheticFrameSource::new(
            frames.width,
            frames.height,
            frames.rotation,
            frames.fps,
            frames.count,
        )),
    }
}

/// Prints the smoothed, overlay-mapped detections of one kind.
fn connect_output(
    coordinator: &DetectionCoordinator,
    kind: DetectionKind,
    overlay: &Arc<Overlay>,
    scheduler: &Arc<dyn Scheduler>,
    settings: &Settings,
    started: Instant,
) -> Box<dyn Connection> {
    let overlay = overlay.clone();
    let scheduler = scheduler.clone();
    let config = settings.interpolator();
    coordinator
        .detections()
        .filter_by_kind(kind)
        .through(move || BoundsScaler::new(overlay.clone()).translating_landmarks(LandmarkKind::ALL))
        .through(move || BoundsInterpolator::new(scheduler.clone(), config))
        .connect_fn(move |detection| print_detection(&detection, started))
}

fn print_detection(detection: &Detection, started: Instant) {
    let line = Emitted {
        t_ms: started.elapsed().as_millis() as u64,
        detection,
    };
    let result = serde_json::to_string(&line)
        .map_err(std::io::Error::from)
        .and_then(|json| writeln!(std::io::stdout().lock(), "{json}"));
    if let Err(e) = result {
        log::error!("Failed to write detection: {e}");
    }
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{value}'"))?;
    let width = width.parse().map_err(|_| format!("invalid width '{width}'"))?;
    let height = height.parse().map_err(|_| format!("invalid height '{height}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("overlay size must be positive, got '{value}'"));
    }
    Ok(Size::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1080x1920"), Ok(Size::new(1080, 1920)));
        assert!(parse_size("1080").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn test_tally_counts_outcomes() {
        let mut tally = Tally::default();
        tally.record(AnalyzeOutcome::Completed { published: 2, failed: 1 });
        tally.record(AnalyzeOutcome::Dropped);
        tally.record(AnalyzeOutcome::TimedOut { pending: 1 });
        assert_eq!(
            (tally.completed, tally.dropped, tally.timed_out, tally.published, tally.failed),
            (1, 1, 1, 2, 1)
        );
    }

    #[test]
    fn test_cli_flags_override_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("settings.json");
        Settings::default().save_to(&config).unwrap();

        let cli = Cli::parse_from([
            "framewatch",
            "replay",
            "script.json",
            "--config",
            config.to_str().unwrap(),
            "--workers",
            "4",
            "--overlay",
            "720x1280",
            "--front-camera",
        ]);
        let Command::Replay(args) = cli.command;
        let settings = load_settings(&args).unwrap();

        assert_eq!(settings.worker_threads, 4);
        assert_eq!(settings.overlay, Size::new(720, 1280));
        assert!(settings.front_camera);
        assert_eq!(settings.join_deadline_ms, None);
    }

    #[test]
    fn test_reap_joins_only_finished_threads() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let finished = thread::spawn(|| AnalyzeOutcome::Dropped);
        let running = thread::spawn(move || {
            let _ = release_rx.recv();
            AnalyzeOutcome::Completed { published: 1, failed: 0 }
        });
        while !finished.is_finished() {
            thread::sleep(Duration::from_millis(1));
        }
        let mut in_flight = vec![finished, running];
        let mut tally = Tally::default();

        tally.reap(&mut in_flight, false);
        assert_eq!(in_flight.len(), 1);
        assert_eq!(tally.dropped, 1);

        release_tx.send(()).unwrap();
        tally.reap(&mut in_flight, true);
        assert!(in_flight.is_empty());
        assert_eq!((tally.completed, tally.published), (1, 1));
    }
}
