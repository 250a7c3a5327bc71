use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anvil::cli::{
    AdminCommands, CreateArgs, MigrateArgs, RepoCommands, UserCommands, run_archive_cleanup,
    run_check_hooks, run_check_stats, run_create_org, run_create_user, run_doctor,
    run_hook_command, run_init, run_purge_inactive, run_repo_archive, run_repo_create,
    run_repo_delete, run_repo_fork, run_repo_migrate, run_repo_mirror_sync, run_repo_rename,
    run_serve, run_sync_hooks, run_user_rename,
};

#[derive(Parser)]
#[command(name = "anvil")]
#[command(about = "Repository lifecycle core for a self-hosted git forge", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "anvil.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mirror scheduler and cron jobs
    Serve,

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Repository lifecycle
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// User accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Entry point for the git hooks installed in each repository
    #[command(hide = true)]
    Hook {
        /// pre-receive, update, post-receive or proc-receive
        event: String,

        /// Arguments git passed to the hook
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn init_logging(is_hook: bool) -> anyhow::Result<()> {
    if is_hook {
        // Anything on stdout or stderr reaches the pushing client.
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("anvil=warn".parse()?))
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("anvil=info".parse()?))
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Commands::Hook { .. }))?;
    let config = cli.config;

    match cli.command {
        Commands::Serve => run_serve(&config).await?,
        Commands::Admin { command } => match command {
            AdminCommands::Init { data_dir, admin } => run_init(&config, data_dir, admin)?,
            AdminCommands::CreateUser { username, admin } => {
                run_create_user(&config, username, admin)?;
            }
            AdminCommands::CreateOrg { name, owner } => run_create_org(&config, name, owner)?,
            AdminCommands::CheckStats => run_check_stats(&config)?,
            AdminCommands::Doctor { fix, json } => run_doctor(&config, fix, json)?,
            AdminCommands::SyncHooks => run_sync_hooks(&config)?,
            AdminCommands::CheckHooks { json } => run_check_hooks(&config, json)?,
            AdminCommands::ArchiveCleanup { older_than } => {
                run_archive_cleanup(&config, older_than)?;
            }
            AdminCommands::PurgeInactive { older_than } => run_purge_inactive(&config, older_than)?,
        },
        Commands::Repo { command } => match command {
            RepoCommands::Create {
                owner,
                name,
                doer,
                description,
                default_branch,
                private,
                auto_init,
                adopt,
            } => run_repo_create(
                &config,
                CreateArgs {
                    owner,
                    name,
                    doer,
                    description,
                    default_branch,
                    private,
                    auto_init,
                    adopt,
                },
            )?,
            RepoCommands::Fork {
                repo,
                owner,
                name,
                doer,
            } => run_repo_fork(&config, &repo, &owner, name, doer)?,
            RepoCommands::Rename {
                repo,
                new_name,
                doer,
            } => run_repo_rename(&config, &repo, &new_name, doer)?,
            RepoCommands::Delete { repo, doer } => run_repo_delete(&config, &repo, doer)?,
            RepoCommands::Migrate {
                clone_addr,
                owner,
                name,
                doer,
                private,
                mirror,
                interval,
            } => run_repo_migrate(
                &config,
                MigrateArgs {
                    clone_addr,
                    owner,
                    name,
                    doer,
                    private,
                    mirror,
                    interval,
                },
            )?,
            RepoCommands::MirrorSync { repo } => run_repo_mirror_sync(&config, &repo).await?,
            RepoCommands::Archive {
                repo,
                reference,
                format,
            } => run_repo_archive(&config, &repo, &reference, &format).await?,
        },
        Commands::User { command } => match command {
            UserCommands::Rename { name, new_name } => run_user_rename(&config, &name, &new_name)?,
        },
        Commands::Hook { event, args } => {
            let code = run_hook_command(&config, &event, &args)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
