use std::fmt;
use std::sync::Arc;

use progress_core::model::{
    ActualBlock, ActualBlockId, PacingSettings, ProgressCounter, StudentId, StudentProblem,
    StudentProblemId, SubfieldId, Tracker, TrackerId,
};
use services::{AdvanceOutcome, PacedReplenishment, ProgressAdvancer};
use storage::repository::{Storage, StorageError};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidId { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_id(flag: &'static str, raw: String) -> Result<u64, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidId { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- seed    [--db <sqlite_url>] [--student <id>]");
    eprintln!("  cargo run -p app -- advance [--db <sqlite_url>] [--student <id>] --problem <id>");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://tracker.sqlite3");
    eprintln!("  --student 1");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TRACKER_DB_URL, TRACKER_STUDENT_ID, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Seed,
    Advance,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "seed" => Some(Self::Seed),
            "advance" => Some(Self::Advance),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    student_id: StudentId,
    problem_id: Option<StudentProblemId>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("TRACKER_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://tracker.sqlite3".into(), normalize_sqlite_url);
        let mut student_id = std::env::var("TRACKER_STUDENT_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| StudentId::new(1), StudentId::new);
        let mut problem_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--student" => {
                    let value = require_value(args, "--student")?;
                    student_id = StudentId::new(parse_id("--student", value)?);
                }
                "--problem" => {
                    let value = require_value(args, "--problem")?;
                    problem_id = Some(StudentProblemId::new(parse_id("--problem", value)?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            student_id,
            problem_id,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Demo curriculum: (block size, extra laps) in block order.
const DEMO_BLOCKS: [(u32, u32); 3] = [(5, 1), (4, 0), (6, 2)];
const DEMO_SUBFIELD: SubfieldId = SubfieldId::new(1);

fn demo_block_id(student_id: StudentId, order: u32) -> ActualBlockId {
    ActualBlockId::new(student_id.value() * 1_000 + u64::from(order))
}

fn demo_problem_id(block_id: ActualBlockId, position: u32) -> StudentProblemId {
    StudentProblemId::new(block_id.value() * 100 + u64::from(position))
}

/// Builds the demo blocks and their problems, numbered in curriculum order.
fn demo_curriculum(
    student_id: StudentId,
) -> Result<Vec<(ActualBlock, Vec<StudentProblem>)>, progress_core::Error> {
    let mut overall = 0;
    let mut curriculum = Vec::with_capacity(DEMO_BLOCKS.len());
    for (order, (size, lap)) in (1_u32..).zip(DEMO_BLOCKS) {
        let block_id = demo_block_id(student_id, order);
        let block = ActualBlock::new(block_id, student_id, DEMO_SUBFIELD, order, size, lap)?;
        let mut problems = Vec::new();
        for position in 1..=size {
            overall += 1;
            problems.push(StudentProblem::new(
                demo_problem_id(block_id, position),
                student_id,
                block_id,
                DEMO_SUBFIELD,
                position,
                overall,
            )?);
        }
        curriculum.push((block, problems));
    }
    Ok(curriculum)
}

async fn seed(storage: &Storage, student_id: StudentId) -> Result<(), Box<dyn std::error::Error>> {
    match storage.trackers.find_tracker(student_id, DEMO_SUBFIELD).await {
        Ok(tracker) => {
            info!(student = %student_id, tracker = %tracker.id(), "already seeded");
            return Ok(());
        }
        Err(StorageError::NotFound) => {}
        Err(err) => return Err(err.into()),
    }

    let curriculum = demo_curriculum(student_id)?;
    let mut problems_total = 0;
    for (block, problems) in &curriculum {
        storage.curriculum.insert_block(block).await?;
        for problem in problems {
            storage.curriculum.insert_problem(problem).await?;
        }
        problems_total += problems.len();
    }

    let first_block = demo_block_id(student_id, 1);
    let tracker = Tracker::new(
        TrackerId::new(student_id.value()),
        student_id,
        DEMO_SUBFIELD,
        first_block,
        demo_problem_id(first_block, 1),
        0,
        true,
        false,
    );
    storage.trackers.upsert_tracker(&tracker).await?;

    let pacing = PacingSettings::default_daily();
    storage
        .pacing
        .upsert_pacing(student_id, DEMO_SUBFIELD, &pacing)
        .await?;
    storage
        .counters
        .persist_counter(&ProgressCounter::new(
            student_id,
            DEMO_SUBFIELD,
            pacing.problems_per_cycle(),
        ))
        .await?;

    info!(
        student = %student_id,
        subfield = %DEMO_SUBFIELD,
        blocks = DEMO_BLOCKS.len(),
        problems = problems_total,
        first_problem = %tracker.student_problem_id(),
        "seeded demo curriculum"
    );
    println!("{}", tracker.student_problem_id());
    Ok(())
}

async fn advance(
    storage: &Storage,
    student_id: StudentId,
    problem_id: StudentProblemId,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy = PacedReplenishment::new(Arc::clone(&storage.pacing));
    let advancer = ProgressAdvancer::from_storage(storage, Arc::new(policy));

    match advancer.advance(student_id, problem_id).await? {
        AdvanceOutcome::Advanced {
            next_problem_id,
            update,
        } => {
            info!(transition = update.as_str(), "advance complete");
            println!("{next_problem_id}");
        }
        AdvanceOutcome::Disabled => println!("disabled"),
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next().as_deref() {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    match cmd {
        Command::Seed => seed(&storage, parsed.student_id).await,
        Command::Advance => {
            let problem_id = parsed
                .problem_id
                .ok_or(ArgsError::MissingFlag { flag: "--problem" })?;
            advance(&storage, parsed.student_id, problem_id).await
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
