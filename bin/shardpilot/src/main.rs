//! Shardpilot CLI - plan and apply Redis-Cluster rebalancing.
//!
//! Snapshot the cluster (or a saved dump), print the defect report,
//! synthesize a plan, show it with a time estimate, and on confirmation
//! ship it command by command.

mod report;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use shardpilot_cluster::{ClusterClient, PlanExecutor, RedisShipper};
use shardpilot_common::config::{ExecutorSettings, PlannerSettings, RetryPolicy, MAX_PORT};
use shardpilot_common::Severity;
use shardpilot_planner::{Plan, Planner};
use shardpilot_topology::{
    checks, snapshot, GroupingMode, Inventory, StaticInventory, Topology,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shardpilot")]
#[command(about = "Rebalance a Redis Cluster across fault domains")]
#[command(version)]
struct Args {
    /// Seed host to connect to
    #[arg(long, default_value = "127.0.0.1", help_heading = "connect")]
    host: String,

    /// Seed port to connect to
    #[arg(short, long, default_value_t = 7000, help_heading = "connect")]
    port: u16,

    /// Redis password (overrides the credentials file)
    #[arg(long, help_heading = "connect")]
    password: Option<String>,

    /// Retire instances above this port: masters there are failed over
    /// to lower-port replicas before any balancing
    #[arg(short, long, default_value_t = MAX_PORT, help_heading = "optional")]
    reduce: u16,

    /// Desired replicas per master (default: inferred from the cluster)
    #[arg(long, help_heading = "optional")]
    replicas: Option<usize>,

    /// Tolerated master-percentage spread across fault domains
    #[arg(short, long, default_value_t = 15.0, help_heading = "optional")]
    skew: f64,

    /// Tolerated master-percentage spread across hosts inside one
    /// datacenter
    #[arg(short, long, default_value_t = 30.0, help_heading = "optional")]
    group_skew: f64,

    /// Seconds to pause between executed operations
    #[arg(short, long, default_value_t = 90, help_heading = "optional")]
    timeout: u64,

    /// Only repair correctness defects, skip rebalancing
    #[arg(long, help_heading = "optional")]
    fix_only: bool,

    /// Rebalance even when the checks are clean
    #[arg(long, help_heading = "optional")]
    force: bool,

    /// Use only nodes with a connected cluster bus link
    #[arg(long, help_heading = "optional")]
    alive_only: bool,

    /// INI file holding default.redis_password
    #[arg(
        long,
        default_value = "/etc/shardpilot/credentials.ini",
        help_heading = "optional"
    )]
    credentials: PathBuf,

    /// Group by host address, ignoring any inventory
    #[arg(long, help_heading = "optional")]
    simple: bool,

    /// JSON file mapping address to datacenter/hostname; enables
    /// datacenter-aware mode
    #[arg(long, help_heading = "optional")]
    inventory_file: Option<PathBuf>,

    /// Proceed despite masters owning no slots
    #[arg(long, help_heading = "optional")]
    noslots_ok: bool,

    /// Skip the interactive confirmation
    #[arg(long, help_heading = "optional")]
    yes: bool,

    /// Log level
    #[arg(long, default_value = "warn", help_heading = "optional")]
    log_level: String,

    /// Only print the current distribution and problems
    #[arg(long, help_heading = "monitoring")]
    dry_run: bool,

    /// Print a one-line summary suited to monitoring pipelines
    #[arg(long, help_heading = "monitoring")]
    nagios: bool,

    /// Save the fetched node list to a JSON file
    #[arg(long, help_heading = "debug", conflicts_with = "load_nodes")]
    save_nodes: Option<PathBuf>,

    /// Load the node list from a JSON file instead of connecting
    #[arg(long, help_heading = "debug")]
    load_nodes: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("shardpilot: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    let password = resolve_password(&args)?;

    let inventory: Option<Box<dyn Inventory>> = match (&args.inventory_file, args.simple) {
        (Some(path), false) => Some(Box::new(
            StaticInventory::from_path(path)
                .with_context(|| format!("loading inventory {}", path.display()))?,
        )),
        _ => None,
    };

    let client = ClusterClient::new(args.host.clone(), args.port, password.clone());
    let topology = if let Some(path) = &args.load_nodes {
        let nodes = snapshot::load(path)?;
        let dc_tagged = nodes.iter().any(|n| n.datacenter.is_some());
        let mode = if !args.simple && (inventory.is_some() || dc_tagged) {
            GroupingMode::Datacenter
        } else {
            GroupingMode::Host
        };
        Topology::from_nodes(nodes, mode)
    } else {
        let topo = client
            .fetch_topology(inventory.as_deref(), inventory.is_some(), args.alive_only)
            .await?;
        if let Some(path) = &args.save_nodes {
            snapshot::save(path, topo.nodes())?;
        }
        topo
    };

    let replicas = match args.replicas {
        Some(replicas) => replicas,
        None => topology
            .inferred_replicas(MAX_PORT)
            .context("cannot infer the replica count")?,
    };
    let settings = PlannerSettings {
        replicas,
        skew: args.skew,
        group_skew: args.group_skew,
        max_port: args.reduce,
    };

    let severity = checks::severity(&topology, &settings);
    if args.nagios && severity != Severity::Ok {
        println!("Cluster has problems; run shardpilot without --nagios for details");
    }

    println!(
        "Processing with replica count {replicas} against {}:{}",
        args.host, args.port
    );
    let failed = checks::failed_nodes(&topology);
    if !failed.is_empty() {
        println!("Cluster has failed node(s):");
        for node in &failed {
            println!("    {}", node.label());
        }
        return Ok(2);
    }

    println!("Current instances per group:");
    report::print_cluster_info(&topology, &settings);
    println!("\nCurrent problems:");
    if !report::print_problems(&topology, &settings) {
        println!("    None");
    }

    if args.dry_run {
        return Ok(severity.exit_code() as u8);
    }

    if !checks::distribution_feasible(&topology, replicas, args.reduce) {
        println!("Cannot place every master-replica shard across distinct fault domains");
        return Ok(1);
    }

    let slotless = checks::masters_without_slots(&topology);
    if !slotless.is_empty() && !args.noslots_ok {
        println!("There are masters without slots, refusing to operate. Pass --noslots-ok to continue:");
        for master in &slotless {
            println!("    {}", master.label());
        }
        return Ok(1);
    }

    let mut planner = Planner::new(topology, settings);
    let outcome = plan_all(&mut planner, &args);
    if let Err(err) = outcome {
        if !planner.plan().is_empty() {
            println!("\nPlan produced before the failure:");
            print_plan(planner.plan());
        }
        return Err(err.into());
    }

    if planner.plan().is_empty() {
        println!("\nNothing to do.");
        return Ok(0);
    }

    println!("\nPlanned command sequence:");
    print_plan(planner.plan());
    let step_delay = Duration::from_secs(args.timeout);
    let eta = planner.plan().estimated_duration(step_delay);
    println!(
        "\n{} operations with {}s between them, roughly {} total",
        planner.plan().len(),
        args.timeout,
        format_duration(eta)
    );

    println!("\nCluster will have instances per group:");
    report::print_cluster_info(planner.topology(), &settings);
    println!("\nAnd remaining problems:");
    if !report::print_problems(planner.topology(), &settings) {
        println!("    None");
    }

    if !args.yes {
        println!(
            "\nProceed executing the plan with {}s between operations?",
            args.timeout
        );
        if !confirm()? {
            return Ok(if severity == Severity::Ok { 0 } else { 1 });
        }
    }

    let finish = Local::now() + chrono::Duration::from_std(eta)?;
    println!("Expected to finish at {}", finish.format("%Y-%m-%d %H:%M"));

    let executor = PlanExecutor::new(
        RedisShipper::new(password),
        ExecutorSettings {
            step_delay,
            retry: RetryPolicy::default(),
        },
    );
    executor.run(planner.plan()).await?;
    println!("Plan executed.");
    Ok(0)
}

fn plan_all(planner: &mut Planner, args: &Args) -> shardpilot_common::Result<()> {
    planner.reduce_ports()?;
    if args.fix_only {
        planner.fix_defects()
    } else {
        planner.rebalance(args.force)
    }
}

fn print_plan(plan: &Plan) {
    for command in plan.commands() {
        println!("{}", command.message);
    }
}

fn resolve_password(args: &Args) -> anyhow::Result<Option<String>> {
    if args.password.is_some() {
        return Ok(args.password.clone());
    }
    if args.credentials.is_file() {
        let cfg = config::Config::builder()
            .add_source(
                config::File::from(args.credentials.as_path()).format(config::FileFormat::Ini),
            )
            .build()
            .with_context(|| format!("reading credentials {}", args.credentials.display()))?;
        if let Ok(password) = cfg.get_string("default.redis_password") {
            return Ok(Some(password));
        }
    }
    Ok(None)
}

fn confirm() -> anyhow::Result<bool> {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF counts as a decline.
            return Ok(false);
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "y" | "ye" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please answer 'yes' or 'no'"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
