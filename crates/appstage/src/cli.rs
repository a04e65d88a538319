//! CLI argument definitions

use appstage_core::{AppAuthnType, ConfigType, ReloadOption, VersionTarget};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "appstage")]
#[command(version, about = "Staged hosting of apps from local folders and git")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output in JSON format instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, list, reload, promote and delete apps
    App {
        #[command(subcommand)]
        command: AppCommand,
    },

    /// Reconcile apps with definition files
    Apply(ApplyArgs),

    /// Set app parameters on staging
    Param {
        #[command(subcommand)]
        command: ParamCommand,
    },

    /// Set container and app config entries on staging
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Link plugin accounts on staging
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Change non-versioned app settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },

    /// Inspect and switch app versions
    Version {
        #[command(subcommand)]
        command: VersionCommand,
    },

    /// Manage recurring apply jobs
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },

    /// Control the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Subcommand)]
pub enum AppCommand {
    /// Create an app from a local folder or a git url
    Create(CreateArgs),

    /// List apps
    List {
        /// App path glob, "all" for every app
        #[arg(default_value = "all")]
        glob: String,

        /// Include staging apps
        #[arg(short, long)]
        internal: bool,
    },

    /// Delete apps and their staging apps
    Delete {
        /// App path glob
        glob: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Reload apps from their source
    Reload(ReloadArgs),

    /// Promote staging apps to production
    Promote {
        /// App path glob
        #[arg(default_value = "all")]
        glob: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Audit apps, approving their loads and permissions
    Approve {
        /// App path glob
        #[arg(default_value = "all")]
        glob: String,

        #[arg(long)]
        dry_run: bool,

        /// Promote after approving
        #[arg(long)]
        promote: bool,
    },
}

#[derive(Args)]
pub struct CreateArgs {
    /// App path, as [domain:]/path
    pub path: String,

    /// Local folder or git url, with an optional #base suffix
    pub source: String,

    /// Serve straight from the source folder, without staging
    #[arg(long)]
    pub dev: bool,

    /// Approve the app's loads and permissions
    #[arg(long)]
    pub approve: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// Authentication: default, none or system
    #[arg(long, default_value = "default", value_parser = parse_authn)]
    pub auth: AppAuthnType,

    /// Git branch
    #[arg(long, default_value = "")]
    pub branch: String,

    /// Git commit, pinning the app to it
    #[arg(long, default_value = "")]
    pub commit: String,

    /// Git auth profile for private repositories
    #[arg(long, default_value = "")]
    pub git_auth: String,

    /// App spec to apply
    #[arg(long, default_value = "")]
    pub spec: String,

    /// Parameter value (KEY=VALUE, repeatable)
    #[arg(long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,
}

#[derive(Args)]
pub struct ReloadArgs {
    /// App path glob
    #[arg(default_value = "all")]
    pub glob: String,

    /// Approve new loads and permissions
    #[arg(long)]
    pub approve: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// Promote after a successful reload
    #[arg(long)]
    pub promote: bool,

    /// Git branch
    #[arg(long, default_value = "")]
    pub branch: String,

    /// Git commit
    #[arg(long, default_value = "")]
    pub commit: String,

    /// Git auth profile
    #[arg(long, default_value = "")]
    pub git_auth: String,

    /// Reload even when the commit is unchanged
    #[arg(long)]
    pub force_reload: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Definition file, directory or glob, or a git url
    pub path: String,

    /// Only apply apps matching this glob
    #[arg(default_value = "all")]
    pub glob: String,

    /// Approve loads and permissions of created and reloaded apps
    #[arg(long)]
    pub approve: bool,

    #[arg(long)]
    pub dry_run: bool,

    /// Promote changed apps
    #[arg(long)]
    pub promote: bool,

    /// Which apps to reload: none, updated or matched
    #[arg(long, default_value = "matched", value_parser = parse_reload)]
    pub reload: ReloadOption,

    /// Branch of the definitions repository
    #[arg(long, default_value = "")]
    pub branch: String,

    /// Commit of the definitions repository
    #[arg(long, default_value = "")]
    pub commit: String,

    /// Git auth profile for the definitions repository
    #[arg(long, default_value = "")]
    pub git_auth: String,

    /// Overwrite changes made outside the definitions
    #[arg(long)]
    pub clobber: bool,

    /// Reload even when the commit is unchanged
    #[arg(long)]
    pub force_reload: bool,
}

/// Options shared by the staged update commands
#[derive(Args)]
pub struct StageArgs {
    /// App path glob
    #[arg(long, default_value = "all")]
    pub glob: String,

    #[arg(long)]
    pub dry_run: bool,

    /// Promote the change to production
    #[arg(long)]
    pub promote: bool,
}

#[derive(Subcommand)]
pub enum ParamCommand {
    /// Set a parameter, "-" deletes it
    Set {
        key: String,
        value: String,

        #[command(flatten)]
        stage: StageArgs,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Set entries of a config section (KEY=VALUE, KEY=- deletes)
    Set {
        /// container_options, container_args, container_volumes or app_config
        #[arg(value_parser = parse_config_type)]
        config_type: ConfigType,

        #[arg(required = true)]
        entries: Vec<String>,

        #[command(flatten)]
        stage: StageArgs,
    },
}

#[derive(Subcommand)]
pub enum AccountCommand {
    /// Link a plugin to an account, "-" removes the link
    Link {
        plugin: String,
        account: String,

        #[command(flatten)]
        stage: StageArgs,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommand {
    /// Update settings of production and staging apps
    Update {
        /// App path glob
        glob: String,

        /// Authentication: default, none or system
        #[arg(long, value_parser = parse_authn)]
        auth: Option<AppAuthnType>,

        /// Git auth profile, "-" clears it
        #[arg(long)]
        git_auth: Option<String>,

        /// Write access of staging apps
        #[arg(long)]
        stage_write_access: Option<bool>,

        /// Write access of preview apps
        #[arg(long)]
        preview_write_access: Option<bool>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum VersionCommand {
    /// List stored versions
    List {
        /// App path
        path: String,
    },

    /// List files of a version
    Files {
        /// App path
        path: String,

        /// Version, the active one when omitted
        #[arg(long)]
        version: Option<i64>,
    },

    /// Switch to another version
    Switch {
        /// App path
        path: String,

        /// previous, next, revert or a version number
        #[arg(value_parser = parse_version_target)]
        target: VersionTarget,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommand {
    /// Create a sync entry and run it once
    Create(SyncCreateArgs),

    /// List sync entries
    List,

    /// Delete a sync entry
    Delete {
        id: String,

        #[arg(long)]
        dry_run: bool,
    },

    /// Run a sync entry now
    Run { id: String },
}

#[derive(Args)]
pub struct SyncCreateArgs {
    /// Definition path or git url
    pub path: String,

    /// Run on a schedule
    #[arg(long)]
    pub scheduled: bool,

    /// Minutes between scheduled runs, the server default when unset
    #[arg(long, default_value = "0")]
    pub minutes: i64,

    #[arg(long)]
    pub dry_run: bool,

    /// Branch of the definitions repository
    #[arg(long, default_value = "")]
    pub branch: String,

    /// Git auth profile
    #[arg(long, default_value = "")]
    pub git_auth: String,

    #[arg(long)]
    pub approve: bool,

    #[arg(long)]
    pub promote: bool,

    /// Which apps to reload: none, updated or matched
    #[arg(long, default_value = "matched", value_parser = parse_reload)]
    pub reload: ReloadOption,

    #[arg(long)]
    pub clobber: bool,

    #[arg(long)]
    pub force_reload: bool,
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon in the background
    Start,

    /// Stop the daemon
    Stop,

    /// Show whether the daemon is running
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or("Expected KEY=VALUE format")?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_authn(s: &str) -> Result<AppAuthnType, String> {
    s.parse().map_err(|e: appstage_core::Error| e.to_string())
}

fn parse_reload(s: &str) -> Result<ReloadOption, String> {
    s.parse().map_err(|e: appstage_core::Error| e.to_string())
}

fn parse_config_type(s: &str) -> Result<ConfigType, String> {
    s.parse().map_err(|e: appstage_core::Error| e.to_string())
}

fn parse_version_target(s: &str) -> Result<VersionTarget, String> {
    s.parse().map_err(|e: appstage_core::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        let (key, value) = parse_key_value("title=My Blog").unwrap();
        assert_eq!(key, "title");
        assert_eq!(value, "My Blog");

        let (key, value) = parse_key_value("expr=a=b").unwrap();
        assert_eq!(key, "expr");
        assert_eq!(value, "a=b");

        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_apply_args() {
        let cli = Cli::try_parse_from([
            "appstage", "apply", "./defs", "/blog*", "--reload", "matched", "--promote",
        ])
        .unwrap();
        match cli.command {
            Commands::Apply(args) => {
                assert_eq!(args.path, "./defs");
                assert_eq!(args.glob, "/blog*");
                assert_eq!(args.reload, ReloadOption::Matched);
                assert!(args.promote);
                assert!(!args.clobber);
            }
            _ => panic!("expected apply"),
        }

        assert!(Cli::try_parse_from(["appstage", "apply", "./defs", "--reload", "always"]).is_err());
    }

    #[test]
    fn test_staged_update_args() {
        let cli = Cli::try_parse_from([
            "appstage", "config", "set", "copt", "cpus=2", "privileged", "--glob", "/blog",
        ])
        .unwrap();
        match cli.command {
            Commands::Config {
                command:
                    ConfigCommand::Set {
                        config_type,
                        entries,
                        stage,
                    },
            } => {
                assert_eq!(config_type, ConfigType::ContainerOptions);
                assert_eq!(entries, vec!["cpus=2", "privileged"]);
                assert_eq!(stage.glob, "/blog");
                assert!(!stage.promote);
            }
            _ => panic!("expected config set"),
        }
    }

    #[test]
    fn test_version_switch_target() {
        let cli =
            Cli::try_parse_from(["appstage", "version", "switch", "/blog", "3", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Version {
                command:
                    VersionCommand::Switch {
                        target, dry_run, ..
                    },
            } => {
                assert_eq!(target, VersionTarget::Version(3));
                assert!(dry_run);
            }
            _ => panic!("expected version switch"),
        }
        assert!(Cli::try_parse_from(["appstage", "version", "switch", "/blog", "latest"]).is_err());
    }
}
