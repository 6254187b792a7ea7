use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use client_core::{
    validation::FieldError,
    wizard::{
        CONFIRM_PASSWORD, EMAIL, FULL_NAME, ID_BACK, ID_FRONT, ID_NUMBER, PASSWORD, PHONE, ROLE,
        TEAM_ID,
    },
    Backend, DeletionController, DeletionOutcome, ListEvent, RecordStore, StepOutcome,
    SubmitOutcome, SupabaseClient, UiDispatcher,
};
use shared::domain::{Record, SimCardId, TeamId, UserId};
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod presenter;

use config::{load_settings, prepare_database_url, Settings, DEFAULT_CONFIG_PATH};
use presenter::{load_local_file, spawn_presenter, Prompter};

#[derive(Parser, Debug)]
#[command(name = "sim-console", about = "Admin console for SIM card distribution records")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Use the local SQLite store even when a Supabase project is configured.
    #[arg(long)]
    local: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Table {
    Users,
    Teams,
    SimCards,
}

#[derive(Subcommand, Debug)]
enum Command {
    List {
        #[arg(value_enum)]
        table: Table,
        #[arg(long)]
        json: bool,
    },
    /// Delete a record with an undo window.
    Delete {
        #[arg(value_enum)]
        table: Table,
        id: String,
        /// Skip the undo window.
        #[arg(long)]
        now: bool,
    },
    CreateUser(CreateUserArgs),
}

#[derive(Args, Debug)]
struct CreateUserArgs {
    #[arg(long)]
    full_name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    role: Option<String>,
    #[arg(long)]
    team_id: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    id_number: Option<String>,
    #[arg(long)]
    id_front: Option<PathBuf>,
    #[arg(long)]
    id_back: Option<PathBuf>,
    /// Fail instead of prompting for missing or invalid values.
    #[arg(long)]
    no_prompt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();

    let settings = load_settings(&cli.config);
    let backend = connect(&settings, cli.local).await?;
    let (dispatcher, commands) = UiDispatcher::channel();
    let presenter = spawn_presenter(commands);

    let result = run(cli.command, &settings, &backend, dispatcher).await;

    // Let queued toasts reach the terminal before exiting.
    let _ = tokio::time::timeout(Duration::from_millis(500), presenter).await;
    result
}

async fn connect(settings: &Settings, force_local: bool) -> Result<Backend> {
    if !force_local {
        if let Some(config) = settings.supabase_config() {
            return Ok(Backend::supabase(SupabaseClient::new(config)?));
        }
    }
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(%database_url, %error, "console: failed to open local store");
        error
    })?;
    storage.health_check().await?;
    Ok(Backend::local(storage))
}

async fn run(
    command: Command,
    settings: &Settings,
    backend: &Backend,
    dispatcher: UiDispatcher,
) -> Result<()> {
    match command {
        Command::List { table, json } => match table {
            Table::Users => list(backend.users.as_ref(), json).await,
            Table::Teams => list(backend.teams.as_ref(), json).await,
            Table::SimCards => list(backend.sim_cards.as_ref(), json).await,
        },
        Command::Delete { table, id, now } => match table {
            Table::Users => {
                let id: UserId = id.parse().with_context(|| format!("invalid user id '{id}'"))?;
                delete_with_undo(Arc::clone(&backend.users), id, settings, dispatcher, now).await
            }
            Table::Teams => {
                let id: TeamId = id.parse().with_context(|| format!("invalid team id '{id}'"))?;
                delete_with_undo(Arc::clone(&backend.teams), id, settings, dispatcher, now).await
            }
            Table::SimCards => {
                let id: SimCardId = id
                    .parse()
                    .with_context(|| format!("invalid sim card id '{id}'"))?;
                delete_with_undo(Arc::clone(&backend.sim_cards), id, settings, dispatcher, now)
                    .await
            }
        },
        Command::CreateUser(args) => create_user(backend, args, dispatcher).await,
    }
}

async fn list<R: Record>(store: &dyn RecordStore<R>, json: bool) -> Result<()> {
    let rows = store.list().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for row in &rows {
        println!("{}  {}", row.id(), row.label());
    }
    println!("{} {}", rows.len(), R::TABLE);
    Ok(())
}

async fn delete_with_undo<R: Record>(
    store: Arc<dyn RecordStore<R>>,
    id: R::Id,
    settings: &Settings,
    dispatcher: UiDispatcher,
    now: bool,
) -> Result<()> {
    let controller = DeletionController::new(
        store,
        Arc::new(dispatcher.clone()),
        settings.deletion_config(),
    )
    .with_dispatcher(dispatcher);
    controller.reload().await?;
    let mut events = controller.subscribe();

    let pending = controller.request_delete(id).await?;
    if now {
        report(controller.finalize_now().await?);
        return Ok(());
    }
    println!(
        "Deleting {}. Enter 'u' to undo or 'd' to delete now ({} s).",
        pending.entity.label(),
        pending.remaining_seconds
    );

    let mut prompter = Prompter::new(true);
    loop {
        tokio::select! {
            line = prompter.next_line(), if prompter.is_interactive() => {
                let outcome = match line?.as_deref().map(str::trim) {
                    Some("u") | Some("undo") => controller.undo().await,
                    Some("d") | Some("now") => controller.finalize_now().await,
                    // Countdown keeps running when stdin closes.
                    None => continue,
                    Some(other) => {
                        println!("unknown answer '{other}'");
                        continue;
                    }
                };
                match outcome {
                    Ok(outcome) => {
                        report(outcome);
                        return Ok(());
                    }
                    // The timer may have won the race; its event follows.
                    Err(err) => info!(%err, "console: answer ignored"),
                }
            }
            event = events.recv() => match event {
                Ok(ListEvent::Countdown { remaining_seconds, .. }) => {
                    print!("\r{remaining_seconds} s left ");
                    std::io::stdout().flush()?;
                }
                Ok(ListEvent::Removed { .. }) | Ok(ListEvent::Restored { .. }) => {
                    println!();
                    return Ok(());
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn report<Id: std::fmt::Display>(outcome: DeletionOutcome<Id>) {
    match outcome {
        DeletionOutcome::Committed { id } => info!(%id, "console: deletion committed"),
        DeletionOutcome::RestoredByUndo { id, index } => {
            info!(%id, index, "console: deletion undone")
        }
        DeletionOutcome::RestoredByFailure { id, message, .. } => {
            error!(%id, error = %message, "console: deletion failed")
        }
    }
}

async fn create_user(backend: &Backend, args: CreateUserArgs, dispatcher: UiDispatcher) -> Result<()> {
    let mut wizard = backend
        .user_wizard(Arc::new(dispatcher.clone()))
        .with_dispatcher(dispatcher);
    let mut prompter = Prompter::new(!args.no_prompt);

    let prefilled = [
        (FULL_NAME, args.full_name),
        (EMAIL, args.email),
        (PHONE, args.phone),
        (ROLE, args.role),
        (TEAM_ID, args.team_id),
        (PASSWORD, args.password.clone()),
        (CONFIRM_PASSWORD, args.password),
        (ID_NUMBER, args.id_number),
    ];
    for (field, value) in prefilled {
        if let Some(value) = value {
            wizard.update_field(field, value);
        }
    }
    for (slot, path) in [(ID_FRONT, args.id_front), (ID_BACK, args.id_back)] {
        if let Some(path) = path {
            wizard.set_attachment(slot, load_local_file(&path).await?)?;
        }
    }

    let mut announced = 0;
    loop {
        let step_number = wizard.current_step();
        let step = wizard
            .step(step_number)
            .cloned()
            .context("wizard step out of range")?;
        if announced != step_number {
            println!("Step {step_number}/{}: {}", wizard.total_steps(), step.title);
            announced = step_number;
        }

        for field in step.fields.iter().filter(|field| field.is_required()) {
            if wizard.field(field.name).map_or(true, |value| value.trim().is_empty()) {
                if let Some(value) = prompter.ask(field.label).await? {
                    wizard.update_field(field.name, value);
                }
            }
        }
        for slot in &step.slots {
            if wizard.attachment(slot.name).is_none() {
                if let Some(path) = prompter.ask(&format!("{} (file path)", slot.label)).await? {
                    wizard.set_attachment(slot.name, load_local_file(Path::new(&path)).await?)?;
                }
            }
        }

        let errors = match wizard.go_next().await? {
            StepOutcome::Advanced { .. } => continue,
            StepOutcome::Blocked(errors) | StepOutcome::Submitted(SubmitOutcome::Blocked(errors)) => {
                errors
            }
            StepOutcome::Submitted(SubmitOutcome::Created(user)) => {
                println!("{}  {} <{}>", user.id, user.full_name, user.email);
                if let Some(password) = wizard.field(PASSWORD) {
                    println!("initial password: {password}");
                }
                return Ok(());
            }
            StepOutcome::Submitted(_) => {
                let message = wizard.form_error().unwrap_or("submission failed").to_string();
                if prompter.confirm("Retry submission?").await? {
                    continue;
                }
                bail!(message);
            }
        };

        for err in &errors {
            println!("  {}: {}", err.field, err.message);
        }
        if !prompter.is_interactive() {
            bail!("user input is incomplete");
        }
        reprompt(&mut wizard, &mut prompter, &errors).await?;
    }
}

async fn reprompt(
    wizard: &mut client_core::UserCreationWizard,
    prompter: &mut Prompter,
    errors: &[FieldError],
) -> Result<()> {
    for err in errors {
        let Some(answer) = prompter.ask(&err.field).await? else {
            continue;
        };
        if err.field == ID_FRONT || err.field == ID_BACK {
            wizard.set_attachment(&err.field, load_local_file(Path::new(&answer)).await?)?;
        } else {
            wizard.update_field(&err.field, answer);
        }
    }
    Ok(())
}
