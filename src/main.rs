use std::future::pending;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use live_attendance::attend_api::{AttendanceService, HttpAttendanceService};
use live_attendance::capture::{CaptureSource, TestPatternSource};
use live_attendance::{
    ActiveSession, ContextStore, HasRecoverySuggestion, LiveSession, SessionConfig, SessionEvent,
};
use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Live attendance from a camera feed:
/// - pick the class and course once with `select`
/// - run `take` during the lecture
/// - fetch the spreadsheet with `download`
#[derive(Parser, Debug)]
#[command(name = "attend")]
#[command(about = "📋 Take class attendance from a live camera feed")]
#[command(long_about = "Take class attendance from a live camera feed.
Frames are sampled once per second and sent to the recognition service; every
student it recognises is counted once for the session.")]
struct Args {
    #[arg(long, global = true, help = "Config file (TOML). Defaults to the per-user attend.toml")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Recognition service base URL, e.g. http://127.0.0.1:5000")]
    service_url: Option<String>,

    #[arg(long, global = true, default_value = "info",
          help = "Log filter when RUST_LOG is unset: error, warn, info, debug, trace")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Choose the class, then the course
    Select {
        #[arg(long, help = "Group (major)")]
        group: String,
        #[arg(long, help = "Subgroup (section)")]
        subgroup: String,
        #[arg(long, help = "Course; omit to list the courses for this class")]
        course: Option<String>,
    },
    /// List the courses of a class
    Courses {
        #[arg(long, help = "Group; defaults to the stored selection")]
        group: Option<String>,
        #[arg(long, help = "Subgroup; defaults to the stored selection")]
        subgroup: Option<String>,
    },
    /// Run a live attendance session for the selected course
    Take {
        #[arg(long, value_enum, default_value_t = SourceKind::default_source())]
        source: SourceKind,

        #[arg(long, help = "Camera index (defaults to camera_index from the config)")]
        device: Option<u32>,

        #[arg(short, long,
              help = "Stop automatically after: 90s, 45m, 2h. Runs until Ctrl-C when omitted")]
        duration: Option<String>,

        #[arg(long, help = "Keep the latest annotated frame from the service at this path")]
        processed_out: Option<PathBuf>,

        #[arg(long, help = "Print the final summary as JSON")]
        json: bool,
    },
    /// Download the attendance record of the selected course
    Download {
        #[arg(short, long, default_value = "attendance.xlsx")]
        output: PathBuf,
    },
    /// Forget the stored selection
    Reset,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SourceKind {
    /// Physical webcam
    Camera,
    /// Synthetic gradient, no hardware needed
    Pattern,
}

impl SourceKind {
    /// The webcam when this build can drive one, the test pattern otherwise.
    const fn default_source() -> Self {
        if cfg!(feature = "camera") {
            SourceKind::Camera
        } else {
            SourceKind::Pattern
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = SessionConfig::load(args.config.as_deref())?;
    if let Some(url) = args.service_url {
        config.service_url = url;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    debug!(?config, "configuration loaded");

    let store = ContextStore::in_dir(config.resolve_state_dir()?);

    match args.command {
        Command::Select {
            group,
            subgroup,
            course,
        } => select(&config, &store, &group, &subgroup, course.as_deref()).await,
        Command::Courses { group, subgroup } => courses(&config, &store, group, subgroup).await,
        Command::Take {
            source,
            device,
            duration,
            processed_out,
            json,
        } => {
            let limit = duration.as_deref().map(parse_duration).transpose()?;
            let device = device.unwrap_or(config.camera_index);
            take(config, &store, open_source(source, device)?, limit, processed_out, json).await
        }
        Command::Download { output } => download(&config, &store, &output).await,
        Command::Reset => {
            store.clear()?;
            println!("Selection cleared.");
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn client(config: &SessionConfig) -> Result<HttpAttendanceService> {
    HttpAttendanceService::with_timeout(&config.service_url, config.request_timeout())
        .context("invalid service URL")
}

async fn select(
    config: &SessionConfig,
    store: &ContextStore,
    group: &str,
    subgroup: &str,
    course: Option<&str>,
) -> Result<()> {
    store.select_class(group, subgroup)?;
    match course {
        Some(course) => {
            let context = store.select_course(course)?.to_context()?;
            println!("Selected {context}");
        }
        None => {
            print_courses(&client(config)?, group, subgroup).await?;
            println!("Pick one with: attend select --group {group:?} --subgroup {subgroup:?} --course <COURSE>");
        }
    }
    Ok(())
}

async fn courses(
    config: &SessionConfig,
    store: &ContextStore,
    group: Option<String>,
    subgroup: Option<String>,
) -> Result<()> {
    let selection = store.load()?;
    let group = group
        .or(selection.group)
        .ok_or_else(|| anyhow!("no group given and none selected"))?;
    let subgroup = subgroup
        .or(selection.subgroup)
        .ok_or_else(|| anyhow!("no subgroup given and none selected"))?;
    print_courses(&client(config)?, &group, &subgroup).await
}

async fn print_courses(service: &dyn AttendanceService, group: &str, subgroup: &str) -> Result<()> {
    let courses = service
        .courses(group, subgroup)
        .await
        .context("could not fetch courses")?;
    if courses.is_empty() {
        println!("No courses for {group}/{subgroup}.");
    }
    for course in courses {
        println!("  {course}");
    }
    Ok(())
}

fn open_source(kind: SourceKind, device: u32) -> Result<Box<dyn CaptureSource>> {
    match kind {
        SourceKind::Pattern => Ok(Box::new(TestPatternSource::default())),
        #[cfg(feature = "camera")]
        SourceKind::Camera => Ok(Box::new(live_attendance::capture::CameraSource::new(device))),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera => Err(anyhow!(
            "camera {device} unavailable: built without camera support. \
Rebuild with --features camera, or use --source pattern"
        )),
    }
}

async fn take(
    config: SessionConfig,
    store: &ContextStore,
    source: Box<dyn CaptureSource>,
    limit: Option<Duration>,
    processed_out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let context = store
        .load()?
        .to_context()
        .context("select a class and course first (attend select ...)")?;

    let session = LiveSession::builder()
        .with_config(config)
        .with_boxed_capture_source(source)
        .build()?;
    let mut active = match session.start(context).await {
        Ok(active) => active,
        Err(e) => {
            if let Some(hint) = e.recovery_suggestion() {
                eprintln!("hint: {hint}");
            }
            return Err(e.into());
        }
    };
    println!("Taking attendance for {}. Press Ctrl-C to finish.", active.context());

    let mut events = active.take_events();
    let deadline = limit.and_then(deadline_after);
    if limit.is_some() && deadline.is_none() {
        warn!("time limit too large; running until Ctrl-C");
    }
    let reason = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break "interrupted",
            _ = sleep_until(deadline) => break "time limit reached",
            _ = active.wait_halted() => break "sampling halted",
            Some(event) = next_event(&mut events) => {
                report(&event, &active, processed_out.as_deref());
            }
        }
    };
    println!("Stopping ({reason})...");

    let stopped = active.stop().await;
    let summary = active.summary();
    if json {
        let report = serde_json::json!({
            "group": summary.context.group(),
            "subgroup": summary.context.subgroup(),
            "course": summary.context.course(),
            "attendance": summary.attendance_count(),
            "attendees": &summary.attendees,
            "cycles_started": summary.cycles_started,
            "cycles_applied": summary.cycles_applied,
            "cycles_failed": summary.cycles_failed,
            "halted": summary.halted,
            "begin_confirmed": summary.begin_confirmed,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Attendance: {}", summary.attendance_count());
        for name in &summary.attendees {
            println!("  {name}");
        }
    }

    stopped.context("session did not end cleanly")?;
    if summary.halted {
        return Err(anyhow!(
            "sampling halted after repeated dispatch failures; check the service"
        ));
    }
    Ok(())
}

/// `None` when `limit` lies beyond what the clock can represent.
fn deadline_after(limit: Duration) -> Option<Instant> {
    Instant::now().checked_add(limit)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn next_event(events: &mut Option<Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}

fn report(event: &SessionEvent, active: &ActiveSession, processed_out: Option<&Path>) {
    match event {
        SessionEvent::CaptureReady { device } => println!("📷 {device} ready"),
        SessionEvent::Began => println!("Session started on the service."),
        SessionEvent::LifecycleFailed { phase, message } => {
            eprintln!("⚠️  {phase} failed: {message}")
        }
        SessionEvent::CycleApplied {
            new_identities,
            attendance,
            ..
        } => {
            if !new_identities.is_empty() {
                println!("✅ {} (present: {attendance})", new_identities.join(", "));
            }
            if let (Some(path), Some(frame)) = (processed_out, active.latest_processed_frame()) {
                if let Err(e) = std::fs::write(path, frame.as_slice()) {
                    warn!(path = %path.display(), error = %e, "could not write processed frame");
                }
            }
        }
        SessionEvent::CycleFailed {
            cycle,
            consecutive,
            message,
        } => eprintln!("⚠️  cycle {cycle} failed ({consecutive} in a row): {message}"),
        SessionEvent::Halted {
            consecutive_failures,
            ..
        } => eprintln!("❌ Sampling stopped after {consecutive_failures} consecutive failures"),
        SessionEvent::CycleSkipped { .. }
        | SessionEvent::StaleResultDiscarded { .. }
        | SessionEvent::Ended
        | SessionEvent::CaptureReleased => {}
    }
}

async fn download(config: &SessionConfig, store: &ContextStore, output: &Path) -> Result<()> {
    let context = store
        .load()?
        .to_context()
        .context("select a class and course first (attend select ...)")?;
    let bytes = client(config)?
        .download_record(context.key())
        .await
        .context("could not download the attendance record")?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("could not write {}", output.display()))?;
    println!("Saved {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

/// Parse duration string like "30s", "2m", "1h"
fn parse_duration(duration: &str) -> Result<Duration> {
    if let Ok(seconds) = duration.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let len = duration.len();
    if len < 2 || !duration.is_char_boundary(len - 1) {
        return Err(anyhow!("Invalid duration format: {}", duration));
    }

    let (num_str, unit) = duration.split_at(len - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid number in duration: {}", num_str))?;

    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => {
            return Err(anyhow!(
                "Invalid duration unit: {}. Use 's' for seconds, 'm' for minutes, 'h' for hours",
                unit
            ));
        }
    };
    num.checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration too large: {}", duration))
}
