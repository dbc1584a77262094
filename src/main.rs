use clap::Parser;
use color_eyre::Result;
use dayplan::cli::{Cli, CommandContext, Commands, run_command};
use dayplan::identity::{RequestContext, StaticIdentity};
use dayplan::{Config, Database, PlannerService, Profile, logging, utils};

fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = Config::load_with_profile(profile)?;

    // Logging is best effort; the planner works without it
    if let Err(err) = logging::init_logging(config.effective_log_level(), &config.get_log_dir()) {
        eprintln!("warning: file logging disabled: {}", err);
    }

    let db_path = config.get_database_path();
    let db = Database::new(
        db_path
            .to_str()
            .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?,
    )?;
    let service = PlannerService::new(db);

    let identity = StaticIdentity(cli.user.or_else(|| Some(config.user.clone())));
    let cx = CommandContext {
        service: &service,
        ctx: RequestContext::from_provider(&identity),
        date: cli.date.unwrap_or_else(utils::today),
        block_minutes: config.default_block_minutes,
        block_color: config.default_color,
    };

    let command = cli.command.unwrap_or(Commands::Show { json: false });
    run_command(command, &cx)?;

    Ok(())
}
