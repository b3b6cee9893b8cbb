//! udo CLI - manage clusters, launch configurations and deployments on AWS.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use udo::asgroup::{DestroyOutcome, LaunchConfigUpdate, RoleStatus};
use udo::deploy::DeploymentStatus;
use udo::launch_config::Activation;
use udo::settings::DEFAULT_REGION;
use udo::{resolve, ConfigStore, Fleet, ResolvedTarget, Settings, YamlConfigStore};
use udo_cloud::Aws;
use udo_notify::{FleetEvent, Notifier};

/// udo - AWS fleet management.
#[derive(Parser)]
#[command(name = "udo", version)]
#[command(about = "Manage clusters, launch configurations, autoscaling groups and deployments")]
struct Cli {
    /// Fleet configuration file.
    #[arg(short, long, global = true, env = "UDO_CONFIG", default_value = "udo.yml")]
    config: PathBuf,

    /// AWS region.
    #[arg(long, global = true, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// Seconds a new group may take to become healthy during rotation.
    #[arg(long, global = true, env = "UDO_ROTATION_TIMEOUT_SECS", default_value = "900")]
    rotation_timeout: u64,

    /// Seconds between health and status polls.
    #[arg(long, global = true, env = "UDO_POLL_INTERVAL_SECS", default_value = "15")]
    poll_interval: u64,

    /// Seconds a group may take to drain before it is deleted.
    #[arg(long, global = true, env = "UDO_DRAIN_TIMEOUT_SECS", default_value = "600")]
    drain_timeout: u64,

    /// Seconds to follow a deployment.
    #[arg(long, global = true, env = "UDO_DEPLOY_TIMEOUT_SECS", default_value = "1800")]
    deploy_timeout: u64,

    /// Directory of cloud-init templates.
    #[arg(long, global = true, env = "UDO_TEMPLATE_DIR")]
    template_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster operations.
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },

    /// Launch configuration operations.
    Lc {
        #[command(subcommand)]
        command: LcCommand,
    },

    /// Autoscaling group operations.
    Asg {
        #[command(subcommand)]
        command: AsgCommand,
    },

    /// Code deployments.
    Deploy {
        #[command(subcommand)]
        command: DeployCommand,
    },

    /// Check external integrations.
    Test {
        #[command(subcommand)]
        command: TestCommand,
    },
}

#[derive(Subcommand)]
enum ClusterCommand {
    /// List configured clusters.
    List,

    /// Show the state of every role in a cluster.
    Status {
        /// Cluster name.
        cluster: String,
    },

    /// Provision networking and create every role's group.
    Create {
        /// Cluster name.
        cluster: String,
    },
}

/// A cluster and optional role (required when the cluster has several).
#[derive(Args)]
struct RoleArgs {
    /// Cluster name.
    cluster: String,

    /// Role name.
    role: Option<String>,
}

#[derive(Subcommand)]
enum LcCommand {
    /// Print the rendered cloud-init script.
    Cloudinit(RoleArgs),

    /// Register a launch configuration for the role's current definition.
    Create(RoleArgs),

    /// Delete a launch configuration.
    Destroy {
        #[command(flatten)]
        target: RoleArgs,

        /// Version to delete (newest when omitted).
        #[arg(long)]
        version: Option<u32>,
    },
}

#[derive(Subcommand)]
enum AsgCommand {
    /// Create the role's group.
    Create(RoleArgs),

    /// Drain and delete the role's group.
    Destroy(RoleArgs),

    /// Replace the role's instances with a fresh group.
    Reload(RoleArgs),

    /// Bind the group to a launch configuration matching the role.
    Updatelc(RoleArgs),

    /// Set desired capacity: `scale <cluster> [role] <desired>`.
    Scale {
        /// Cluster name.
        cluster: String,

        /// Optional role followed by the desired capacity.
        #[arg(num_args = 1..=2, required = true, value_name = "[ROLE] DESIRED")]
        args: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ListKind {
    #[value(alias = "applications")]
    Apps,
    Groups,
    Configs,
    Deployments,
}

#[derive(Subcommand)]
enum DeployCommand {
    /// List applications, deployment groups, configs or deployments.
    List {
        /// What to list.
        what: ListKind,

        /// Application (for `groups`).
        application: Option<String>,
    },

    /// Deploy a commit: `create <cluster> [role] <commit>`.
    Create {
        /// Cluster name.
        cluster: String,

        /// Optional role followed by the commit id.
        #[arg(num_args = 1..=2, required = true, value_name = "[ROLE] COMMIT")]
        args: Vec<String>,

        /// Follow the deployment until it finishes.
        #[arg(long, default_value = "false")]
        wait: bool,
    },
}

#[derive(Subcommand)]
enum TestCommand {
    /// Send a test message through every notification channel.
    Integrations,
}

/// Split `[role] <value>` positionals.
fn split_role_arg(mut args: Vec<String>) -> Result<(Option<String>, String)> {
    let value = args.pop().context("Missing argument")?;
    Ok((args.pop(), value))
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            region: self.region.clone(),
            rotation_timeout: Duration::from_secs(self.rotation_timeout),
            poll_interval: Duration::from_secs(self.poll_interval),
            drain_timeout: Duration::from_secs(self.drain_timeout),
            deploy_timeout: Duration::from_secs(self.deploy_timeout),
            template_dir: self.template_dir.clone(),
            ..Settings::default()
        }
    }

    fn fleet(&self) -> Result<Fleet> {
        let config = YamlConfigStore::load(&self.config).context("Failed to load configuration")?;
        let aws = Arc::new(Aws::from_env(&self.region).context("Failed to create AWS client")?);
        let fleet = Fleet::new(
            Arc::new(config),
            aws.clone(),
            aws,
            Notifier::from_env(),
            &self.settings(),
        )?;
        Ok(fleet)
    }
}

fn target(fleet: &Fleet, cluster: &str, role: Option<&str>) -> Result<ResolvedTarget> {
    let target = resolve(fleet.config.as_ref(), cluster, role)?;
    if let Some(notice) = &target.notice {
        println!("{notice}");
    }
    Ok(target)
}

fn activation_summary(activation: &Activation) -> String {
    let verb = if activation.created { "Created" } else { "Up to date:" };
    format!(
        "{verb} {} (v{})",
        activation.version.name, activation.version.version
    )
}

fn print_role_status(status: &RoleStatus) {
    let health = format!("{}/{}", status.healthy_instance_count, status.desired_capacity());
    let health = if status.is_healthy() {
        health.green()
    } else {
        health.yellow()
    };
    println!(
        "{:<24} {:<12} {:<8} {:<10} {:<10} {}",
        status.role,
        status.state.to_string(),
        status
            .current_version
            .map_or_else(|| "-".to_string(), |v| format!("v{v}")),
        status.capacity.to_string(),
        health,
        status.groups.join(",")
    );
}

fn print_role_header() {
    println!(
        "\n{:<24} {:<12} {:<8} {:<10} {:<10} {}",
        "ROLE", "STATE", "LC", "MIN/DES/MAX", "HEALTHY", "GROUPS"
    );
    println!("{}", "-".repeat(80));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Cluster { command } => run_cluster(&cli, command).await,
        Commands::Lc { command } => run_lc(&cli, command).await,
        Commands::Asg { command } => run_asg(&cli, command).await,
        Commands::Deploy { command } => run_deploy(&cli, command).await,
        Commands::Test {
            command: TestCommand::Integrations,
        } => run_test_integrations().await,
    }
}

async fn run_cluster(cli: &Cli, command: &ClusterCommand) -> Result<()> {
    match command {
        ClusterCommand::List => {
            let config =
                YamlConfigStore::load(&cli.config).context("Failed to load configuration")?;
            println!("\n{:<24} {}", "CLUSTER", "ROLES");
            println!("{}", "-".repeat(60));
            for name in config.cluster_names() {
                let cluster = config.get_cluster_config(&name)?;
                println!("{:<24} {}", cluster.name, cluster.role_names().join(", "));
            }
        }

        ClusterCommand::Status { cluster } => {
            let fleet = cli.fleet()?;
            let status = fleet.clusters.status(cluster).await?;
            print_role_header();
            for (role, result) in &status.roles {
                match result {
                    Ok(role_status) => print_role_status(role_status),
                    Err(e) => println!("{:<24} {}", format!("{cluster}/{role}"), e.to_string().red()),
                }
            }
            if status.healthy() {
                println!("\n{} {cluster} is healthy", "✓".green());
            } else {
                println!("\n{} {cluster} is not healthy", "✗".red());
            }
        }

        ClusterCommand::Create { cluster } => {
            let fleet = cli.fleet()?;
            let report = fleet.clusters.create(cluster).await?;
            println!("\nCluster {} (VPC {})", report.cluster, report.vpc_id);
            for (role, result) in &report.roles {
                match result {
                    Ok(status) => println!("  {} {role}: {}", "✓".green(), status.groups.join(",")),
                    Err(e) => println!("  {} {role}: {e}", "✗".red()),
                }
            }
            if !report.is_success() {
                bail!(
                    "{} of {} roles failed: {}",
                    report.failed_roles().len(),
                    report.roles.len(),
                    report.failed_roles().join(", ")
                );
            }
        }
    }
    Ok(())
}

async fn run_lc(cli: &Cli, command: &LcCommand) -> Result<()> {
    let fleet = cli.fleet()?;
    match command {
        LcCommand::Cloudinit(args) => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            print!("{}", fleet.launch_configs.cloud_init_script(&target)?);
        }

        LcCommand::Create(args) => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            let activation = fleet.launch_configs.activate(&target).await?;
            println!("{} {}", "✓".green(), activation_summary(&activation));
        }

        LcCommand::Destroy { target: args, version } => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            let name = match version {
                Some(version) => {
                    fleet.launch_configs.deactivate(&target, *version).await?;
                    format!("{} v{version}", target.key())
                }
                None => fleet.launch_configs.deactivate_latest(&target).await?.name,
            };
            println!("{} Deleted {name}", "✓".green());
        }
    }
    Ok(())
}

async fn run_asg(cli: &Cli, command: &AsgCommand) -> Result<()> {
    let fleet = cli.fleet()?;
    match command {
        AsgCommand::Create(args) => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            let status = fleet.groups.create(&target).await?;
            print_role_header();
            print_role_status(&status);
        }

        AsgCommand::Destroy(args) => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            match fleet.groups.destroy(&target).await? {
                DestroyOutcome::AlreadyAbsent => println!("{} has no group", target.key()),
                DestroyOutcome::Destroyed { groups } => {
                    println!("{} Destroyed {}", "✓".green(), groups.join(", "));
                }
            }
        }

        AsgCommand::Reload(args) => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            let report = fleet.groups.reload(&target).await?;
            println!(
                "{} Rotated {} -> {} in {}s ({} health checks)",
                "✓".green(),
                report.old_group,
                report.new_group,
                report.elapsed.as_secs(),
                report.samples.len()
            );
        }

        AsgCommand::Updatelc(args) => {
            let target = target(&fleet, &args.cluster, args.role.as_deref())?;
            match fleet.groups.update_lc(&target).await? {
                LaunchConfigUpdate::Unchanged { launch_config } => {
                    println!("{launch_config} is already current");
                }
                LaunchConfigUpdate::Reattached { group, to, .. } => {
                    println!("{} {group} now uses {to}", "✓".green());
                }
                LaunchConfigUpdate::Rotated(report) => {
                    println!(
                        "{} Rotated {} -> {}",
                        "✓".green(),
                        report.old_group,
                        report.new_group
                    );
                }
            }
        }

        AsgCommand::Scale { cluster, args } => {
            let (role, desired) = split_role_arg(args.clone())?;
            let desired: u32 = desired
                .parse()
                .with_context(|| format!("Invalid desired capacity: {desired}"))?;
            let target = target(&fleet, cluster, role.as_deref())?;
            let capacity = fleet.groups.scale(&target, desired).await?;
            println!("{} {} scaled to {capacity}", "✓".green(), target.key());
        }
    }
    Ok(())
}

async fn run_deploy(cli: &Cli, command: &DeployCommand) -> Result<()> {
    let fleet = cli.fleet()?;
    match command {
        DeployCommand::List { what, application } => match what {
            ListKind::Apps => {
                for app in fleet.deployments.list_applications().await? {
                    println!("{app}");
                }
            }
            ListKind::Groups => {
                println!("\n{:<24} {}", "APPLICATION", "GROUP");
                println!("{}", "-".repeat(60));
                for group in fleet.deployments.list_groups(application.as_deref()).await? {
                    println!("{:<24} {}", group.application, group.name);
                }
            }
            ListKind::Configs => {
                for config in fleet.deployments.list_configs().await? {
                    println!("{config}");
                }
            }
            ListKind::Deployments => {
                for id in fleet.deployments.list_deployments().await? {
                    println!("{id}");
                }
            }
        },

        DeployCommand::Create {
            cluster,
            args,
            wait,
        } => {
            let (role, commit) = split_role_arg(args.clone())?;
            let target = target(&fleet, cluster, role.as_deref())?;
            let mut deployment = fleet.deployments.create_for(&target, &commit).await?;
            println!(
                "{} Deployment {} created ({}/{} @ {})",
                "✓".green(),
                deployment.id,
                deployment.application,
                deployment.group,
                deployment.revision
            );

            if *wait {
                let status = fleet.deployments.wait(&mut deployment).await?;
                if status != DeploymentStatus::Succeeded {
                    bail!("Deployment {} finished as {status}", deployment.id);
                }
                println!("{} Deployment {} succeeded", "✓".green(), deployment.id);
            }
        }
    }
    Ok(())
}

async fn run_test_integrations() -> Result<()> {
    let notifier = Notifier::from_env();
    if !notifier.has_channels() {
        bail!("No notification channels configured (set SLACK_WEBHOOK_URL)");
    }

    let results = notifier
        .notify_and_wait(FleetEvent::IntegrationTest {
            message: "Testing udo integrations".to_string(),
            timestamp: chrono::Utc::now(),
        })
        .await;

    let mut failed = 0;
    for (channel, result) in results {
        match result {
            Ok(()) => println!("{} {channel}", "✓".green()),
            Err(e) => {
                failed += 1;
                println!("{} {channel}: {e}", "✗".red());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} notification channel(s) failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_split_role_arg() {
        assert_eq!(
            split_role_arg(vec!["3".to_string()]).unwrap(),
            (None, "3".to_string())
        );
        assert_eq!(
            split_role_arg(vec!["web".to_string(), "3".to_string()]).unwrap(),
            (Some("web".to_string()), "3".to_string())
        );
    }

    #[test]
    fn test_parses_scale_with_role() {
        let cli = Cli::try_parse_from(["udo", "asg", "scale", "prod", "web", "4"]).unwrap();
        match cli.command {
            Commands::Asg {
                command: AsgCommand::Scale { cluster, args },
            } => {
                assert_eq!(cluster, "prod");
                assert_eq!(args, vec!["web", "4"]);
            }
            _ => panic!("expected asg scale"),
        }
    }

    #[test]
    fn test_activation_summary() {
        let version = udo::LaunchConfigVersion {
            cluster: "prod".to_string(),
            role: "web".to_string(),
            version: 3,
            hash: "0a1b2c3d4e5f".to_string(),
            name: "prod-web-v3-0a1b2c3d4e5f".to_string(),
            created_at: None,
        };
        let created = Activation {
            version: version.clone(),
            created: true,
        };
        assert_eq!(
            activation_summary(&created),
            "Created prod-web-v3-0a1b2c3d4e5f (v3)"
        );
        let reused = Activation {
            version,
            created: false,
        };
        assert_eq!(
            activation_summary(&reused),
            "Up to date: prod-web-v3-0a1b2c3d4e5f (v3)"
        );
    }

    #[test]
    fn test_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["udo", "asg", "explode", "prod"]).is_err());
        assert!(Cli::try_parse_from(["udo", "deploy", "create", "prod"]).is_err());
    }

    #[test]
    fn test_list_accepts_applications_alias() {
        let cli = Cli::try_parse_from(["udo", "deploy", "list", "applications"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Deploy {
                command: DeployCommand::List {
                    what: ListKind::Apps,
                    ..
                }
            }
        ));
    }
}
