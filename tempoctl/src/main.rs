use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tempo_ipc::client::{SyncOutcome, TimerClient, Transport, UnixTransport};
use tempo_ipc::{format_clock, Command, Response, TimerState, SOCKET_PATH};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tempoctl")]
#[command(about = "Control the tempo timer", long_about = None)]
struct Cli {
    /// Socket tempo listens on
    #[arg(long, global = true, default_value = SOCKET_PATH)]
    socket: PathBuf,
    /// Duration shown when no timer exists, and the value reset restores (seconds)
    #[arg(long, global = true, env = "TEMPO_DEFAULT_DURATION", default_value_t = 1500)]
    default_duration: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DurationArgs {
    #[arg(short, long, default_value_t = 0)]
    minutes: u64,
    #[arg(short, long, default_value_t = 0)]
    seconds: u64,
}

impl DurationArgs {
    /// Falls back to `default` when neither part is given.
    fn total_or(&self, default: u64) -> u64 {
        match self.minutes.saturating_mul(60).saturating_add(self.seconds) {
            0 => default,
            total => total,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the timer, or resume a paused one
    Start {
        #[command(flatten)]
        duration: DurationArgs,
        /// What the timer's side effects apply to, e.g. a page URL
        #[arg(long, default_value = "terminal")]
        subject: String,
        /// Keep showing the countdown until it ends
        #[arg(short, long)]
        watch: bool,
    },
    /// Pause the timer
    Stop,
    /// Drop the timer and show the default duration again
    Reset {
        #[command(flatten)]
        duration: DurationArgs,
    },
    /// Get timer status
    Status,
    /// Show the last saved snapshot
    Snapshot,
    /// Is focus mode engaged?
    Focus,
    /// Point the timer at a reloaded or replaced subject
    Retarget { subject: String },
    /// Follow the countdown until it stops
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let transport = UnixTransport::new(cli.socket);

    match cli.command {
        Commands::Start {
            duration,
            subject,
            watch,
        } => {
            let mut client = TimerClient::new(transport, cli.default_duration);
            client.attach().await?;
            if !client
                .start(duration.total_or(cli.default_duration), subject)
                .await
            {
                bail!("tempo did not start the timer");
            }
            println!("OK");
            if watch {
                follow(&mut client).await?;
            }
        }
        Commands::Stop => {
            let mut client = TimerClient::new(transport, cli.default_duration);
            client.stop().await;
            print_status(&mut client).await?;
        }
        Commands::Reset { duration } => {
            let mut client =
                TimerClient::new(transport, duration.total_or(cli.default_duration));
            client.reset().await;
            print_status(&mut client).await?;
        }
        Commands::Status => {
            let mut client = TimerClient::new(transport, cli.default_duration);
            print_status(&mut client).await?;
        }
        Commands::Watch => {
            let mut client = TimerClient::new(transport, cli.default_duration);
            follow(&mut client).await?;
        }
        Commands::Snapshot => match request(transport, Command::Snapshot).await? {
            Response::Snapshot(Some(stored)) => {
                println!("{}", serde_json::to_string_pretty(&stored)?);
            }
            Response::Snapshot(None) => println!("No snapshot saved yet"),
            other => bail!("Unexpected response: {:?}", other),
        },
        Commands::Focus => match request(transport, Command::FocusStatus).await? {
            Response::Focus(active) => {
                println!("Focus mode: {}", if active { "on" } else { "off" });
            }
            other => bail!("Unexpected response: {:?}", other),
        },
        Commands::Retarget { subject } => {
            match request(transport, Command::Retarget { subject_id: subject }).await? {
                Response::Accepted(true) => println!("OK"),
                Response::Accepted(false) => println!("No timer to retarget"),
                other => bail!("Unexpected response: {:?}", other),
            }
        }
    }

    Ok(())
}

async fn request(mut transport: UnixTransport, command: Command) -> Result<Response> {
    match transport.request(command).await? {
        Response::Error(e) => bail!("tempo: {}", e),
        response => Ok(response),
    }
}

async fn print_status(client: &mut TimerClient<UnixTransport>) -> Result<()> {
    let view = client.attach().await?;
    println!("State: {:?}", view.state);
    println!(
        "Remaining: {} / {}",
        format_clock(view.remaining_seconds),
        format_clock(view.total_duration_seconds)
    );
    Ok(())
}

async fn follow(client: &mut TimerClient<UnixTransport>) -> Result<()> {
    let view = client.attach().await?;
    if !view.running {
        println!("Timer is not running ({})", format_clock(view.remaining_seconds));
        return Ok(());
    }

    let mut stdout = std::io::stdout();
    let outcome = client
        .follow(|view| {
            let _ = write!(stdout, "\r{} ", format_clock(view.remaining_seconds));
            let _ = stdout.flush();
        })
        .await;
    println!();

    match outcome {
        SyncOutcome::Completed => println!("Time's up!"),
        SyncOutcome::Stopped => {
            let view = client.view();
            let state = if view.state == TimerState::Idle { "Reset" } else { "Paused" };
            println!("{} at {}", state, format_clock(view.remaining_seconds));
        }
        SyncOutcome::Unreachable => bail!("Lost contact with tempo"),
    }
    Ok(())
}
