use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use marshal_scope_api::{ContextType, ItemRequest, MarshalRequest, ScopeApi, ViewerRef};
use serde_json::Value;
use time::OffsetDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "msc")]
#[command(about = "Marshal scope CLI")]
struct Cli {
    /// Event snapshot file; `.yaml`/`.yml` is read as YAML, anything else as JSON.
    #[arg(long, default_value = "./event_facts.json")]
    facts: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate one checklist item for one marshal.
    Evaluate(ItemArgs),
    /// List the marshal's visible checklist, one row per context they act for.
    Checklist(ChecklistArgs),
    /// Show every shared context the marshal acts for on one item.
    Contexts(ItemArgs),
    /// Per-context completion report for one item across the event.
    Report(ReportArgs),
    /// Preview the completion record a marshal would write.
    Plan(PlanArgs),
    /// Explain whether a viewer can see one incident.
    Incident(IncidentArgs),
    /// List incidents visible to a viewer, newest first.
    Incidents(ViewerArgs),
    Notes(MarshalArgs),
    Contacts(MarshalArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ContextTypeArg {
    Checkpoint,
    Area,
    Personal,
}

impl From<ContextTypeArg> for ContextType {
    fn from(value: ContextTypeArg) -> Self {
        match value {
            ContextTypeArg::Checkpoint => Self::Checkpoint,
            ContextTypeArg::Area => Self::Area,
            ContextTypeArg::Personal => Self::Personal,
        }
    }
}

#[derive(Debug, Args)]
struct ItemArgs {
    #[arg(long)]
    event: String,
    #[arg(long)]
    marshal: String,
    #[arg(long)]
    item: String,
    /// Act for this shared context instead of the evaluator's pick.
    #[arg(long, value_enum, requires = "context_id")]
    context_type: Option<ContextTypeArg>,
    #[arg(long, requires = "context_type")]
    context_id: Option<String>,
}

#[derive(Debug, Args)]
struct MarshalArgs {
    #[arg(long)]
    event: String,
    #[arg(long)]
    marshal: String,
}

#[derive(Debug, Args)]
struct ChecklistArgs {
    #[arg(long)]
    event: String,
    #[arg(long)]
    marshal: String,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
struct ReportArgs {
    #[arg(long)]
    event: String,
    #[arg(long)]
    item: String,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[command(flatten)]
    item: ItemArgs,
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
struct ViewerArgs {
    #[arg(long)]
    event: String,
    #[arg(long)]
    marshal: Option<String>,
    #[arg(long, default_value_t = false)]
    admin: bool,
}

#[derive(Debug, Args)]
struct IncidentArgs {
    #[command(flatten)]
    viewer: ViewerArgs,
    #[arg(long)]
    incident: String,
}

impl ItemArgs {
    fn into_request(self) -> ItemRequest {
        ItemRequest {
            event_id: self.event,
            marshal_id: self.marshal,
            item_id: self.item,
            context_type: self.context_type.map(ContextType::from),
            context_id: self.context_id,
        }
    }
}

impl ViewerArgs {
    fn viewer(&self) -> ViewerRef {
        ViewerRef {
            marshal_id: self.marshal.clone(),
            as_admin: self.admin,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&with_contract_version(value))?;
    println!("{rendered}");
    Ok(())
}

fn emit<T: serde::Serialize>(response: &T, what: &str) -> Result<()> {
    let value = serde_json::to_value(response)
        .with_context(|| format!("failed to serialize {what}"))?;
    emit_json(value)
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    tracing::debug!(facts = %cli.facts.display(), "msc starting");

    let api = ScopeApi::new(cli.facts);
    match cli.command {
        Command::Evaluate(args) => emit(&api.evaluate_item(&args.into_request())?, "evaluation"),
        Command::Checklist(args) => {
            let as_of = args.as_of.as_deref().map(parse_rfc3339).transpose()?;
            let response = api.checklist_for_marshal(&MarshalRequest {
                event_id: args.event,
                marshal_id: args.marshal,
                as_of,
            })?;
            emit(&response, "checklist")
        }
        Command::Contexts(args) => {
            let response = api.item_contexts(&args.into_request())?;
            emit(&response, "item contexts")
        }
        Command::Report(args) => {
            let response = api.completion_report(&args.event, &args.item)?;
            emit(&response, "completion report")
        }
        Command::Plan(args) => {
            let at = args.at.as_deref().map(parse_rfc3339).transpose()?;
            let response = api.plan_completion(&args.item.into_request(), at)?;
            emit(&response, "completion plan")
        }
        Command::Incident(args) => {
            let viewer = args.viewer.viewer();
            let response = api.incident_visibility(&args.viewer.event, &args.incident, &viewer)?;
            emit(&response, "incident visibility")
        }
        Command::Incidents(args) => {
            let response = api.incidents_for_viewer(&args.event, &args.viewer())?;
            emit(&response, "incident list")
        }
        Command::Notes(args) => {
            let response = api.notes_for_marshal(&args.event, &args.marshal)?;
            emit(&response, "notes")
        }
        Command::Contacts(args) => {
            let response = api.contacts_for_marshal(&args.event, &args.marshal)?;
            emit(&response, "contacts")
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}
