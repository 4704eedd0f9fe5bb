mod client;
mod render;

use clap::{Parser, Subcommand};
use common::{Action, DispatchOutcome, Environment, JobId, Request, Response, ViewEntry};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use client::Client;

#[derive(Parser)]
#[command(author, version, about = "Drive and watch CAPI/CAPA ROSA HCP operations", long_about = None)]
struct Cli {
    /// capiopsd socket (defaults to the system socket, else the per-user one)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Target {
    /// Hub environment (mce, minikube)
    #[arg(long = "env", default_value = "mce")]
    environment: Environment,
    /// Follow the operation until it finishes
    #[arg(long)]
    wait: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the hub environment
    Verify {
        cluster: String,
        #[command(flatten)]
        target: Target,
    },
    /// Enable CAPI/CAPA on the hub
    Configure {
        cluster: String,
        /// Installation method passed to the task
        #[arg(long)]
        install_method: Option<String>,
        #[command(flatten)]
        target: Target,
    },
    /// Provision a ROSA HCP cluster
    Provision {
        cluster: String,
        /// Custom CAPA controller image
        #[arg(long)]
        image: Option<String>,
        /// Extra variable, repeatable (KEY=VALUE)
        #[arg(long = "var", value_parser = render::parse_var)]
        vars: Vec<(String, String)>,
        #[command(flatten)]
        target: Target,
    },
    /// Delete a ROSA HCP cluster
    Delete {
        cluster: String,
        #[arg(long, default_value = "ns-rosa-hcp")]
        namespace: String,
        #[command(flatten)]
        target: Target,
    },
    /// Run a test suite
    Test {
        suite: String,
        /// Extra variable, repeatable (KEY=VALUE)
        #[arg(long = "var", value_parser = render::parse_var)]
        vars: Vec<(String, String)>,
        #[command(flatten)]
        target: Target,
    },
    /// Show recent operations, newest first
    Recent {
        #[arg(long = "env")]
        environment: Option<Environment>,
        /// Print CSV instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Refresh recent operations until all of them have finished
    Watch {
        #[arg(long = "env")]
        environment: Option<Environment>,
        /// Longest wait between refreshes, in seconds; tracked jobs refresh as soon as they change
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
    /// Show one backend job
    Job { id: String },
    /// Print a backend job's log
    Logs { id: String },
    /// Delete all job history
    Clear,
    /// Print daemon metrics
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(|| PathBuf::from(common::socket_path()));
    let client = Client::new(socket);

    let (action, wait) = match cli.command {
        Commands::Verify { cluster, target } => (
            Action::Verify { cluster, environment: target.environment },
            target.wait,
        ),
        Commands::Configure { cluster, install_method, target } => (
            Action::Configure { cluster, environment: target.environment, install_method },
            target.wait,
        ),
        Commands::Provision { cluster, image, vars, target } => (
            Action::Provision {
                cluster,
                environment: target.environment,
                custom_image: image,
                extra_vars: vars.into_iter().collect::<BTreeMap<_, _>>(),
            },
            target.wait,
        ),
        Commands::Delete { cluster, namespace, target } => (
            Action::Delete { cluster, namespace, environment: target.environment },
            target.wait,
        ),
        Commands::Test { suite, vars, target } => (
            Action::RunTest {
                suite,
                environment: target.environment,
                extra_vars: vars.into_iter().collect(),
            },
            target.wait,
        ),
        Commands::Recent { environment, csv } => {
            let entries = recent(&client, environment).await?;
            if csv {
                render::write_csv(&entries, std::io::stdout())?;
            } else if entries.is_empty() {
                println!("No recent operations.");
            } else {
                println!("{}", render::entries_table(&entries));
            }
            return Ok(());
        }
        Commands::Watch { environment, interval } => return watch(&client, environment, interval).await,
        Commands::Job { id } => {
            match client.request(&Request::GetJob(JobId(id))).await? {
                Response::JobDetail(job) => render::print_job(&job),
                other => return unexpected(other),
            }
            return Ok(());
        }
        Commands::Logs { id } => {
            match client.request(&Request::GetLogs(JobId(id))).await? {
                Response::Logs(lines) => lines.iter().for_each(|l| println!("{}", l)),
                other => return unexpected(other),
            }
            return Ok(());
        }
        Commands::Clear => {
            match client.request(&Request::ClearHistory).await? {
                Response::Ok => println!("History cleared."),
                other => return unexpected(other),
            }
            return Ok(());
        }
        Commands::Metrics => {
            match client.request(&Request::Metrics).await? {
                Response::Metrics(text) => print!("{}", text),
                other => return unexpected(other),
            }
            return Ok(());
        }
    };

    dispatch(&client, action, wait).await
}

fn unexpected(resp: Response) -> anyhow::Result<()> {
    match resp {
        Response::Error(e) => anyhow::bail!("{}", e),
        other => anyhow::bail!("unexpected response from capiopsd: {:?}", other),
    }
}

async fn recent(client: &Client, environment: Option<Environment>) -> anyhow::Result<Vec<ViewEntry>> {
    match client.request(&Request::Recent { environment }).await? {
        Response::Entries(entries) => Ok(entries),
        other => unexpected(other).map(|_| Vec::new()),
    }
}

async fn dispatch(client: &Client, action: Action, wait: bool) -> anyhow::Result<()> {
    let title = action.title();
    let outcome = match client.request(&Request::Dispatch(action)).await? {
        Response::Dispatched(outcome) => outcome,
        other => return unexpected(other),
    };

    match outcome {
        DispatchOutcome::Rejected { reason, existing } => {
            match existing {
                Some(id) => anyhow::bail!("{} (operation {})", reason, id),
                None => anyhow::bail!("{}", reason),
            }
        }
        DispatchOutcome::Finished(op) => {
            println!("{}: {}", title, op.status);
            if let Some(output) = &op.output {
                println!("{}", output);
            }
            if matches!(op.status, common::Status::Failed(_)) {
                std::process::exit(1);
            }
            Ok(())
        }
        DispatchOutcome::Submitted { operation, job_id } => {
            println!("{}: submitted as job {} (operation {})", title, job_id, operation.id);
            if wait {
                wait_for(client, &job_id, &operation.id.0).await
            } else {
                Ok(())
            }
        }
    }
}

/// Blocks in the daemon until its poller has moved past `since`, or `timeout` passes.
async fn wait_for_change(client: &Client, since: u64, timeout: Duration) -> anyhow::Result<u64> {
    let req = Request::WaitForChange { since, timeout_ms: timeout.as_millis() as u64 };
    match client.request(&req).await? {
        Response::Revision(rev) => Ok(rev),
        other => unexpected(other).map(|_| since),
    }
}

/// Re-queries the view until the job, or the operation it came from, is terminal.
async fn wait_for(client: &Client, job_id: &JobId, operation_id: &str) -> anyhow::Result<()> {
    let mut last_status = None;
    let mut revision = u64::MAX;
    loop {
        revision = wait_for_change(client, revision, Duration::from_secs(30)).await?;
        let entries = recent(client, None).await?;
        let Some(entry) = entries.iter().find(|e| e.id == job_id.0 || e.id == operation_id) else {
            continue;
        };
        if last_status.as_ref() != Some(&entry.status) {
            println!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), entry.status);
            last_status = Some(entry.status.clone());
        }
        if entry.status.is_terminal() {
            if matches!(entry.status, common::Status::Failed(_)) {
                std::process::exit(1);
            }
            return Ok(());
        }
    }
}

async fn watch(client: &Client, environment: Option<Environment>, interval: u64) -> anyhow::Result<()> {
    let interval = Duration::from_secs(interval.max(1));
    let mut revision = u64::MAX;
    loop {
        revision = wait_for_change(client, revision, interval).await?;
        let entries = recent(client, environment.clone()).await?;
        // Clear screen, cursor home
        print!("\x1B[2J\x1B[H");
        println!("capiops recent operations at {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        println!("{}", render::entries_table(&entries));
        if render::all_terminal(&entries) {
            println!("All operations finished.");
            return Ok(());
        }
    }
}
