use crate::config::{parse_mode, OpenConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// pmq - inspect and drive POSIX message queues
#[derive(Parser, Debug)]
#[clap(name = "pmq", version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// JSON file with default open settings (flags, mode, limits)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a queue and close it again
    Create(CreateArgs),

    /// Send a message, or fill the queue with random bytes
    Send(SendArgs),

    /// Print every message currently queued, without waiting
    Receive(ReceiveArgs),

    /// Wait for messages and print them as they arrive
    Watch(WatchArgs),

    /// Show queue attributes
    Info(InfoArgs),

    /// Remove a queue name
    Unlink(QueueName),
}

#[derive(clap::Args, Debug)]
pub struct QueueName {
    /// Queue name, e.g. /jobs
    pub name: String,
}

#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    /// Queue name, e.g. /jobs
    pub name: String,

    /// Permission bits in octal
    #[clap(long, value_parser = parse_mode)]
    pub mode: Option<u32>,

    /// Maximum number of queued messages
    #[clap(long)]
    pub max_messages: Option<usize>,

    /// Maximum message size in bytes
    #[clap(long)]
    pub message_size: Option<usize>,

    /// Fail if the queue already exists
    #[clap(long, default_value_t = false)]
    pub exclusive: bool,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Queue name, e.g. /jobs
    pub name: String,

    /// Message text
    #[clap(required_unless_present = "fill")]
    pub message: Option<String>,

    /// Priority band, higher is delivered first
    #[clap(short = 'p', long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..32))]
    pub priority: u32,

    /// Push random one-byte messages until the queue is full
    #[clap(long, default_value_t = false, conflicts_with = "message")]
    pub fill: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReceiveArgs {
    /// Queue name, e.g. /jobs
    pub name: String,

    /// Stop after this many messages
    #[clap(short = 'n', long)]
    pub count: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Queue name, e.g. /jobs
    pub name: String,

    /// How long to watch before giving up
    #[clap(short = 't', long, value_parser = parse_duration, default_value = crate::defaults::WATCH_TIMEOUT)]
    pub timeout: Duration,

    /// Exit after the first batch of messages has been drained
    #[clap(long, default_value_t = false)]
    pub once: bool,

    /// Unlink the queue after draining (implies --once)
    #[clap(long, default_value_t = false)]
    pub unlink: bool,
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Queue name, e.g. /jobs
    pub name: String,

    /// Print JSON instead of text
    #[clap(long, default_value_t = false)]
    pub json: bool,
}

impl Args {
    /// Base open settings: the `--config` file if given, defaults otherwise,
    /// with `name` filled in.
    pub fn open_config(&self, name: &str) -> anyhow::Result<OpenConfig> {
        let mut config = match &self.config {
            Some(path) => OpenConfig::from_json_file(path)?,
            None => OpenConfig::default(),
        };
        config.name = name.to_string();
        Ok(config)
    }
}

impl CreateArgs {
    /// Apply the creation flags on top of `base`. Values not given on the
    /// command line keep what `base` has.
    pub fn apply(&self, mut base: OpenConfig) -> anyhow::Result<OpenConfig> {
        base.create = true;
        base.exclusive = base.exclusive || self.exclusive;
        base.mode = match (self.mode, base.mode) {
            (Some(mode), _) => Some(mode),
            (None, Some(mode)) => Some(mode),
            (None, None) => Some(
                parse_mode(crate::defaults::CREATE_MODE).map_err(|e| anyhow::anyhow!(e))?,
            ),
        };
        if let Some(max_messages) = self.max_messages {
            base.max_messages = max_messages;
        }
        if let Some(message_size) = self.message_size {
            base.message_size_limit = message_size;
        }
        Ok(base)
    }
}

/// Parse duration from string (e.g., "10s", "5m", "500ms")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let duration = match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Ok(duration)
}
