use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use seance::api::{HttpTicketService, TicketService};
use seance::config::Config;
use seance::logging;
use seance::types::{Attachment, Ticket, TicketCreate, TicketSubmission};
use seance::workflow::{Phase, WorkflowController, WorkflowOptions, WorkflowSnapshot};

#[derive(Parser)]
#[command(name = "seance")]
#[command(about = "Watch a helpdesk ticket's agent swarm at work")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Helpdesk service URL (overrides config)
    #[arg(long)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a ticket
    Create {
        #[command(flatten)]
        fields: TicketFields,

        /// Start the workflow and follow it
        #[arg(short, long)]
        watch: bool,
    },

    /// Submit a ticket with screenshots; the service starts the workflow
    Submit {
        #[command(flatten)]
        fields: TicketFields,

        /// Image to attach (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        /// Follow the workflow once submitted
        #[arg(short, long)]
        watch: bool,
    },

    /// List tickets
    List,

    /// Show one ticket
    Show { ticket_id: String },

    /// Make a single process call and print the handoffs so far
    Process { ticket_id: String },

    /// Start the workflow for a ticket and follow it until it ends
    Watch {
        ticket_id: String,

        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Fail if the service shrinks or rewrites the handoff sequence
        #[arg(long)]
        strict: bool,
    },

    /// Check the helpdesk service health
    Health,

    /// Write the default configuration to .seance/config.toml
    Init,
}

#[derive(clap::Args)]
struct TicketFields {
    #[arg(long)]
    title: String,

    #[arg(long)]
    description: String,

    /// low, medium, high, critical
    #[arg(long, default_value = "medium")]
    severity: String,

    /// network, cloud, other
    #[arg(long, default_value = "other")]
    category: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }

    let logging_handle = logging::init_logging(&config, cli.debug)?;

    let result = match cli.command {
        Commands::Create { fields, watch } => cmd_create(&config, fields, watch).await,
        Commands::Submit {
            fields,
            files,
            watch,
        } => cmd_submit(&config, fields, files, watch).await,
        Commands::List => cmd_list(&config).await,
        Commands::Show { ticket_id } => cmd_show(&config, &ticket_id).await,
        Commands::Process { ticket_id } => cmd_process(&config, &ticket_id).await,
        Commands::Watch {
            ticket_id,
            interval_ms,
            strict,
        } => cmd_watch(&config, &ticket_id, interval_ms, strict).await,
        Commands::Health => cmd_health(&config).await,
        Commands::Init => cmd_init(),
    };

    if let Some(log_path) = logging_handle.log_file_path {
        if log_path.metadata().is_ok_and(|m| m.len() > 0) {
            eprintln!("Session log: {}", log_path.display());
        }
    }

    result
}

fn service(config: &Config) -> Result<Arc<dyn TicketService>> {
    let service = HttpTicketService::from_config(&config.api)
        .with_context(|| format!("Failed to create client for {}", config.api.base_url))?;
    Ok(Arc::new(service))
}

fn print_ticket_line(ticket: &Ticket) {
    println!(
        "{:<12} [{:<10}] {:<8} {}",
        ticket.ticket_id, ticket.status, ticket.severity, ticket.title
    );
}

async fn cmd_create(config: &Config, fields: TicketFields, watch: bool) -> Result<()> {
    let service = service(config)?;
    let request = TicketCreate {
        title: fields.title,
        description: fields.description,
        severity: fields.severity,
        category: fields.category,
    };

    let ticket = service
        .create_ticket(&request)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("Created ticket {}", ticket.ticket_id);

    if watch {
        follow(config, service, &ticket.ticket_id, WorkflowOptions::from(&config.workflow)).await?;
    }
    Ok(())
}

async fn cmd_submit(
    config: &Config,
    fields: TicketFields,
    files: Vec<PathBuf>,
    watch: bool,
) -> Result<()> {
    let mut attachments = Vec::with_capacity(files.len());
    for path in &files {
        attachments.push(Attachment::from_path(path).await?);
    }

    let service = service(config)?;
    let submission = TicketSubmission {
        title: fields.title,
        description: fields.description,
        severity: fields.severity,
        category: fields.category,
        attachments,
    };

    let response = service
        .submit_ticket(submission)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    println!("Submitted ticket {} [{}]", response.ticket_id, response.status);
    if let Some(message) = &response.message {
        println!("  {}", message);
    }
    if let Some(count) = response.files_processed {
        println!("  {} file(s) processed", count);
    }

    if watch {
        follow(config, service, &response.ticket_id, WorkflowOptions::from(&config.workflow))
            .await?;
    }
    Ok(())
}

async fn cmd_list(config: &Config) -> Result<()> {
    let tickets = service(config)?
        .list_tickets()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if tickets.is_empty() {
        println!("No tickets");
        return Ok(());
    }

    println!("Tickets ({})", tickets.len());
    println!("{}", "─".repeat(60));
    for ticket in &tickets {
        print_ticket_line(ticket);
    }
    Ok(())
}

async fn cmd_show(config: &Config, ticket_id: &str) -> Result<()> {
    let ticket = service(config)?
        .get_ticket(ticket_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    println!("Ticket {}", ticket.ticket_id);
    println!("{}", "─".repeat(60));
    println!("  Title:    {}", ticket.title);
    println!("  Status:   {}", ticket.status);
    println!("  Severity: {}", ticket.severity);
    println!("  Category: {}", ticket.category);
    println!("  Created:  {}", ticket.created_at);
    println!("  Updated:  {}", ticket.updated_at);
    println!();
    println!("{}", ticket.description);

    if let Some(resolution) = &ticket.resolution {
        println!();
        println!("Resolution:");
        println!("{}", resolution);
    }
    if let Some(log) = ticket.workflow_log.as_deref().filter(|l| !l.is_empty()) {
        println!();
        println!("Workflow log:");
        for line in log {
            println!("  {}", line);
        }
    }
    Ok(())
}

async fn cmd_process(config: &Config, ticket_id: &str) -> Result<()> {
    let result = service(config)?
        .process_ticket(ticket_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let status = result
        .workflow_result
        .as_ref()
        .map_or("none", |w| w.status.as_str());
    println!("Ticket {} [{}] workflow: {}", result.ticket_id, result.status, status);

    let handoffs = result.handoff_sequence();
    if handoffs.is_empty() {
        println!("No handoffs yet");
    }
    for (index, actor) in handoffs.iter().enumerate() {
        println!("  {:>2}. {}", index + 1, actor);
    }
    if let Some(text) = result.outcome_text() {
        println!();
        println!("{}", text);
    }
    Ok(())
}

async fn cmd_watch(
    config: &Config,
    ticket_id: &str,
    interval_ms: Option<u64>,
    strict: bool,
) -> Result<()> {
    let mut options = WorkflowOptions::from(&config.workflow);
    if let Some(ms) = interval_ms {
        options.poll_interval = Duration::from_millis(ms.max(1));
    }
    if strict {
        options.strict_sequence = true;
    }

    follow(config, service(config)?, ticket_id, options).await
}

async fn cmd_health(config: &Config) -> Result<()> {
    let report = service(config)?
        .health()
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let icon = if report.is_healthy() { "✓" } else { "✗" };
    println!("{} {} ({})", icon, report.status, config.api.base_url);

    let mut services: Vec<_> = report.services.iter().collect();
    services.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in services {
        println!("  {:<16} {}", name, value);
    }
    Ok(())
}

fn cmd_init() -> Result<()> {
    let path = Config::project_config_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    Config::default().save()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// Prints the parts of successive snapshots that have not been shown yet
#[derive(Default)]
struct ProgressPrinter {
    run_id: Option<uuid::Uuid>,
    printed: usize,
    active_agent: Option<String>,
}

impl ProgressPrinter {
    fn render(&mut self, snapshot: &WorkflowSnapshot) {
        if snapshot.run_id != self.run_id {
            self.run_id = snapshot.run_id;
            self.printed = 0;
            self.active_agent = None;
        }

        for entry in snapshot.logs.iter().skip(self.printed) {
            println!(
                "{}  {:<20} {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.actor_name,
                entry.message
            );
        }
        self.printed = snapshot.logs.len();

        if snapshot.active_agent != self.active_agent {
            if let Some(agent) = &snapshot.active_agent {
                println!("          ▶ {} is channeling...", agent);
            }
            self.active_agent = snapshot.active_agent.clone();
        }
    }
}

/// Run the controller for one ticket, printing progress until the run ends or
/// Ctrl-C stops it
async fn follow(
    config: &Config,
    service: Arc<dyn TicketService>,
    ticket_id: &str,
    options: WorkflowOptions,
) -> Result<()> {
    let controller = WorkflowController::new(service, options);
    let mut rx = controller.subscribe();
    let mut printer = ProgressPrinter::default();

    println!("Contacting the spirits at {}...", config.api.base_url);

    let start = controller.start(ticket_id);
    tokio::pin!(start);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut started = false;

    let snapshot = loop {
        tokio::select! {
            result = &mut start, if !started => {
                result?;
                started = true;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break controller.snapshot();
                }
            }
            _ = &mut ctrl_c => {
                controller.stop();
                let snapshot = controller.snapshot();
                printer.render(&snapshot);
                println!("Séance interrupted");
                return Ok(());
            }
        }

        let snapshot = rx.borrow_and_update().clone();
        printer.render(&snapshot);
        if started && !snapshot.phase.is_live() {
            break snapshot;
        }
    };

    match snapshot.phase {
        Phase::Complete => {
            println!();
            println!("✓ Workflow complete");
            if let Some(text) = snapshot.result.as_ref().and_then(|r| r.outcome_text()) {
                println!();
                println!("{}", text);
            }
            Ok(())
        }
        Phase::Error => {
            let message = snapshot.error.unwrap_or_else(|| "workflow failed".to_string());
            bail!(message)
        }
        other => bail!("workflow ended in unexpected phase: {}", other),
    }
}
