use clap::{Args, Parser, Subcommand};
use keel::{
    BrokerId, GroupId, InMemoryPartitionCatalog, MemberId, PartitionCatalog, StrategyConfig,
    StrategyKind, assign, create_strategy,
};
use keel_coordinator::{
    CoordinatorService, GroupDescription, JoinRequest, LeaveRequest, ManifestLoader,
    RebalanceService, member::DEFAULT_INBOX_CAPACITY, member_channel,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(name = "keel-sim", version, about = "Partition assignment simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the assignment of N partitions over M members
    Assign(AssignCmd),
    /// Replay a membership script against an in-process coordinator
    Simulate(SimulateCmd),
}

#[derive(Args, Debug)]
struct AssignCmd {
    #[arg(long)]
    partitions: u32,
    #[arg(long)]
    members: usize,
    /// averaging | circular | consistent_hash | static
    #[arg(long, default_value = "averaging")]
    strategy: StrategyKind,
    #[arg(long, default_value_t = 10)]
    virtual_nodes: u32,
    #[arg(long, default_value = "topic")]
    topic: String,
}

#[derive(Args, Debug)]
struct SimulateCmd {
    /// JSON or YAML cluster manifest
    #[arg(long)]
    manifest: PathBuf,
    /// Group to drive; defaults to the first group in the manifest
    #[arg(long)]
    group: Option<String>,
    /// Comma-separated steps: join:ID, leave:ID, grow:N, reconcile
    #[arg(long)]
    script: String,
    /// Print each step's group description as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Join(String),
    Leave(String),
    Grow(u32),
    Reconcile,
}

fn parse_script(script: &str) -> Result<Vec<Step>, String> {
    script
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| match raw.split_once(':') {
            Some(("join", id)) => Ok(Step::Join(id.to_string())),
            Some(("leave", id)) => Ok(Step::Leave(id.to_string())),
            Some(("grow", n)) => n
                .parse()
                .map(Step::Grow)
                .map_err(|e| format!("invalid partition count in '{raw}': {e}")),
            None if raw == "reconcile" => Ok(Step::Reconcile),
            _ => Err(format!("unknown step '{raw}'")),
        })
        .collect()
}

fn run_assign(args: AssignCmd) {
    let partitions: Vec<_> = (0..args.partitions)
        .map(|id| keel::Partition::new(args.topic.as_str(), BrokerId(0), id.into()))
        .collect();
    let members: Vec<MemberId> = (0..args.members)
        .map(|i| MemberId::new_unchecked(format!("member-{i}")))
        .collect();
    let config = StrategyConfig {
        kind: args.strategy,
        virtual_nodes: args.virtual_nodes,
        ..StrategyConfig::default()
    };
    let strategy = create_strategy(&config);
    let assignment = assign(strategy.as_ref(), &partitions, &members);

    println!(
        "strategy: {}  partitions: {}  members: {}",
        strategy.name(),
        args.partitions,
        args.members
    );
    print!("{assignment}");
}

fn print_description(step: &str, description: &GroupDescription, json: bool) {
    if json {
        match serde_json::to_string(description) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("failed to encode description: {e}"),
        }
        return;
    }
    println!(
        "== {step} -> {} [{:?}, {:?}]",
        description.epoch, description.state, description.health
    );
    print!("{}", description.assignment);
}

async fn run_simulation(args: SimulateCmd) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = ManifestLoader::from_path(&args.manifest)?;
    let steps = parse_script(&args.script)?;

    let group_spec = match &args.group {
        Some(id) => manifest.get_group(id)?.clone(),
        None => manifest
            .groups
            .first()
            .cloned()
            .ok_or("manifest declares no groups")?,
    };

    let catalog = InMemoryPartitionCatalog::with_topics(manifest.topics.iter().cloned())?;
    let service = Arc::new(CoordinatorService::new(
        manifest.coordinator.clone(),
        Arc::new(catalog.clone()),
    )?);
    let group_id = GroupId::parse(group_spec.group_id.as_str())?;
    service.register_group(group_id.clone(), &group_spec.topic, group_spec.strategy)?;

    let mut members: HashMap<String, JoinHandle<()>> = HashMap::new();
    for step in steps {
        let label = format!("{step:?}").to_lowercase();
        match step {
            Step::Join(id) => {
                let member_id = MemberId::parse(id.as_str())?;
                let (handle, inbox) = member_channel(DEFAULT_INBOX_CAPACITY);
                members.insert(id, inbox.auto_acknowledge(member_id.clone()));
                let request = JoinRequest::new(group_id.clone(), member_id);
                if let Err(e) = service.join(request, Arc::new(handle)).await {
                    eprintln!("join failed: {e}");
                }
            }
            Step::Leave(id) => {
                let request = LeaveRequest {
                    group_id: group_id.clone(),
                    member_id: MemberId::parse(id.as_str())?,
                };
                if let Err(e) = service.leave(request).await {
                    eprintln!("leave failed: {e}");
                }
                if let Some(task) = members.remove(&id) {
                    task.abort();
                }
            }
            Step::Grow(additional) => {
                let count = catalog.add_partitions(&group_spec.topic, additional)?;
                println!("topic '{}' now has {count} partitions", group_spec.topic);
                service.notify_partitions_changed(&group_spec.topic).await;
            }
            Step::Reconcile => service.reconcile(&group_id).await?,
        }

        let description = service.describe_group(&group_id).await?;
        print_description(&label, &description, args.json);
    }

    let partitions = catalog.partitions_of(&group_spec.topic)?;
    let description = service.describe_group(&group_id).await?;
    if let Err(e) = description
        .assignment
        .verify(group_id.as_str(), &partitions, false)
    {
        eprintln!("final assignment is inconsistent: {e}");
    }

    service.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    keel::telemetry::init_with_filter("warn");

    let cli = Cli::parse();
    match cli.command {
        Commands::Assign(args) => run_assign(args),
        Commands::Simulate(args) => run_simulation(args).await?,
    }
    Ok(())
}
