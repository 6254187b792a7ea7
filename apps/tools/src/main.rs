use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::{NewSimCard, NewTeam, SimCardId, SimCardStatus, TeamId, UserId};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/console.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateTeam {
        name: String,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        leader_id: Option<String>,
    },
    AddSim {
        serial_number: String,
        #[arg(long)]
        team_id: Option<String>,
    },
    /// Move a SIM card to `in_stock`, `sold` or `activated`.
    SetSimStatus {
        id: String,
        status: String,
    },
    Summary,
}

fn parse_id<T: std::str::FromStr<Err = uuid::Error>>(raw: &str, what: &str) -> Result<T> {
    raw.parse::<T>()
        .with_context(|| format!("invalid {what} id '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateTeam {
            name,
            region,
            leader_id,
        } => {
            let leader_id = leader_id
                .as_deref()
                .map(|raw| parse_id::<UserId>(raw, "user"))
                .transpose()?;
            let team = storage
                .create_team(&NewTeam {
                    name,
                    leader_id,
                    region,
                })
                .await?;
            println!("created team_id={}", team.id);
        }
        Command::AddSim {
            serial_number,
            team_id,
        } => {
            let team_id = team_id
                .as_deref()
                .map(|raw| parse_id::<TeamId>(raw, "team"))
                .transpose()?;
            let sim = storage
                .create_sim_card(&NewSimCard {
                    serial_number,
                    team_id,
                    status: SimCardStatus::InStock,
                })
                .await?;
            println!("created sim_card_id={}", sim.id);
        }
        Command::SetSimStatus { id, status } => {
            let id = parse_id::<SimCardId>(&id, "sim card")?;
            let status = SimCardStatus::parse(&status.to_ascii_lowercase())
                .ok_or_else(|| anyhow!("unknown sim card status '{status}'"))?;
            let sim = storage
                .set_sim_card_status(id, status)
                .await?
                .ok_or_else(|| anyhow!("no sim card with id {id}"))?;
            println!("sim_card_id={} status={}", sim.id, sim.status.as_str());
        }
        Command::Summary => {
            let users = storage.list_users().await?;
            let teams = storage.list_teams().await?;
            let sims = storage.list_sim_cards().await?;
            println!("users={} teams={} sim_cards={}", users.len(), teams.len(), sims.len());
            for status in [SimCardStatus::InStock, SimCardStatus::Sold, SimCardStatus::Activated] {
                let count = sims.iter().filter(|sim| sim.status == status).count();
                println!("  {}={count}", status.as_str());
            }
        }
    }

    Ok(())
}
