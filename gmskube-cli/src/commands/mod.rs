//! Command line surface of `gmskube`.
//!
//! Arguments are turned into [`InstanceSettings`] and checked before the
//! cluster is contacted, so bad input never changes anything.

mod augment;

pub use augment::{AugmentArgs, AugmentCommands, handle_augment_command};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;

use crate::cluster::{ClusterClient, KubeCluster};
use crate::dataload::DataLoadClient;
use crate::error::{MissingConfigOverrideSnafu, MissingTagSnafu};
use crate::helm::{HelmCli, helm_version_for};
use crate::ingress::render_routes;
use crate::instance::{
    AUGMENTATIONS, ChartSource, InstanceType, slugify_tag, validate_instance_name, validate_set,
};
use crate::listing::{ListFilter, render_instances};
use crate::orchestrator::Orchestrator;
use crate::settings::{CONTAINER_DEPLOY_DIR, Defaults, DryRun, InstanceSettings};

#[derive(Debug, Parser)]
#[clap(
    name = "gmskube",
    version,
    about = "Install and configure instances of GMS on Kubernetes",
    long_about = "Each instance is a multi-container application managed as a single unit \
                  in its own namespace. Set the kubectl context to the target cluster first."
)]
pub struct Cli {
    #[clap(flatten)]
    pub global: GlobalArgs,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args, Clone)]
pub struct GlobalArgs {
    /// Enable debug logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Operator defaults file (default: the gmskube config directory)
    #[clap(long, global = true, value_name = "FILE")]
    pub defaults: Option<PathBuf>,

    /// Run on the host rather than inside the gmskube image
    #[clap(long, global = true, env = "GMSKUBE_WITHOUT_CONTAINER")]
    pub without_container: bool,

    /// Directory holding the chart directories
    #[clap(long, global = true, value_name = "DIR")]
    pub deploy_dir: Option<PathBuf>,

    /// Registry the instance images are pulled from
    #[clap(long, global = true, env = "CI_DOCKER_REGISTRY")]
    pub docker_registry: Option<String>,

    /// PEM bundle trusted when talking to the config loader
    #[clap(long, global = true, env = "REQUESTS_CA_BUNDLE", value_name = "FILE")]
    pub ca_bundle: Option<PathBuf>,

    /// Config loader address, instead of the one derived from the ingress
    #[clap(long, global = true, value_name = "URL")]
    pub loader_url: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Install an instance of the system
    Install(InstallArgs),

    /// Upgrade an instance of the system
    Upgrade(UpgradeArgs),

    /// Uninstall an instance of the system
    Uninstall(UninstallArgs),

    /// Reconfigure a running instance of the system
    Reconfig(ReconfigArgs),

    /// List instances
    #[clap(alias = "ls")]
    List(ListArgs),

    /// List the ingress routes of an instance
    Ingress(IngressArgs),

    /// Augment a running instance of the system
    #[clap(subcommand)]
    Augment(AugmentCommands),
}

/// CI derives image tags from branch names with the same rule
fn parse_tag(value: &str) -> Result<String, std::convert::Infallible> {
    Ok(slugify_tag(value))
}

#[derive(Debug, Args, Clone, Default)]
pub struct TagArg {
    /// Docker tag of the images; normalized like `CI_COMMIT_REF_SLUG`
    #[clap(long, value_parser = parse_tag)]
    pub tag: Option<String>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct TimeoutArg {
    /// Minutes to wait for each step to complete
    #[clap(long, value_name = "MINUTES")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args, Clone, Default)]
pub struct ValueOverrides {
    /// Helm value override, may be repeated
    #[clap(long = "set", value_name = "KEY=VALUE", value_parser = validate_set)]
    pub sets: Vec<String>,

    /// Helm string value override, may be repeated
    #[clap(long = "set-string", value_name = "KEY=VALUE", value_parser = validate_set)]
    pub set_strings: Vec<String>,

    /// Helm values file, may be repeated
    #[clap(long = "values", value_name = "FILE")]
    pub values: Vec<PathBuf>,
}

#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct ChartArgs {
    /// Packaged instance type to install
    #[clap(long = "type", value_enum)]
    pub instance_type: Option<InstanceType>,

    /// Local chart directory to install instead of a packaged type
    #[clap(long)]
    pub chart: Option<PathBuf>,
}

impl ChartArgs {
    fn source(&self) -> ChartSource {
        match (&self.chart, self.instance_type) {
            (Some(path), _) => ChartSource::Custom(path.clone()),
            (None, Some(instance_type)) => ChartSource::Type(instance_type),
            (None, None) => ChartSource::Installed,
        }
    }
}

fn chart_source(chart: Option<&Path>) -> ChartSource {
    chart.map_or(ChartSource::Installed, |path| {
        ChartSource::Custom(path.to_path_buf())
    })
}

#[derive(Debug, Args, Clone)]
pub struct InstallArgs {
    /// Name of the instance
    pub name: String,

    #[clap(flatten)]
    pub chart: ChartArgs,

    #[clap(flatten)]
    pub tag: TagArg,

    #[clap(flatten)]
    pub timeout: TimeoutArg,

    #[clap(flatten)]
    pub overrides: ValueOverrides,

    /// Augmentation to enable, may be repeated
    #[clap(long = "augment", value_parser = PossibleValuesParser::new(AUGMENTATIONS.iter().copied()))]
    pub augmentations: Vec<String>,

    /// Directory of configuration overrides to load into the instance
    #[clap(long = "config", value_name = "DIR")]
    pub config_override: Option<PathBuf>,

    /// Port to reach the instance from outside the cluster
    #[clap(long)]
    pub port: Option<u16>,

    /// Install into an existing namespace
    #[clap(long)]
    pub reuse_namespace: bool,

    /// Validate the release without installing it; repeat to only render
    /// it locally
    #[clap(long, action = ArgAction::Count)]
    pub dry_run: u8,

    /// Oracle wallet directory to use instead of the shared one
    #[clap(long, value_name = "DIR")]
    pub wallet_path: Option<PathBuf>,

    /// Disable istio sidecar injection in the namespace
    #[clap(long)]
    pub no_istio: bool,
}

#[derive(Debug, Args, Clone)]
pub struct UpgradeArgs {
    /// Name of the instance
    pub name: String,

    /// Local chart directory to upgrade with
    #[clap(long)]
    pub chart: Option<PathBuf>,

    #[clap(flatten)]
    pub tag: TagArg,

    #[clap(flatten)]
    pub timeout: TimeoutArg,

    #[clap(flatten)]
    pub overrides: ValueOverrides,

    /// Augmentation to enable, may be repeated
    #[clap(long = "augment", value_parser = PossibleValuesParser::new(AUGMENTATIONS.iter().copied()))]
    pub augmentations: Vec<String>,

    /// Validate the upgrade without applying it
    #[clap(long, action = ArgAction::Count)]
    pub dry_run: u8,
}

#[derive(Debug, Args, Clone)]
pub struct UninstallArgs {
    /// Name of the instance
    pub name: String,

    #[clap(flatten)]
    pub tag: TagArg,

    #[clap(flatten)]
    pub timeout: TimeoutArg,

    /// Keep the namespace
    #[clap(long)]
    pub reuse_namespace: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ReconfigArgs {
    /// Name of the instance
    pub name: String,

    #[clap(flatten)]
    pub tag: TagArg,

    #[clap(flatten)]
    pub timeout: TimeoutArg,

    /// Directory of configuration overrides to load into the instance
    #[clap(long = "config", value_name = "DIR")]
    pub config_override: Option<PathBuf>,

    /// Port to reach the instance from outside the cluster
    #[clap(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    /// Only list this instance; fails if it does not exist
    pub name: Option<String>,

    /// Only list instances deployed by this user
    #[clap(long)]
    pub user: Option<String>,

    /// Only list instances of this type
    #[clap(long = "type")]
    pub instance_type: Option<String>,

    /// Include releases that are not GMS instances
    #[clap(short, long)]
    pub all: bool,

    #[clap(flatten)]
    pub tag: TagArg,
}

#[derive(Debug, Args, Clone)]
pub struct IngressArgs {
    /// Name of the instance
    pub name: String,

    /// Only print the URL of this service
    #[clap(long)]
    pub service: Option<String>,

    /// Port to reach the instance from outside the cluster
    #[clap(long)]
    pub port: Option<u16>,
}

/// Values shared by every command, resolved once at startup
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub global: GlobalArgs,
    pub defaults: Defaults,
}

impl CommandContext {
    pub fn new(global: GlobalArgs) -> Self {
        let defaults = Defaults::load(global.defaults.as_deref());
        Self { global, defaults }
    }

    pub fn deploy_dir(&self) -> PathBuf {
        match &self.global.deploy_dir {
            Some(dir) => dir.clone(),
            None if self.global.without_container => self.defaults.deploy_dir.clone(),
            None => PathBuf::from(CONTAINER_DEPLOY_DIR),
        }
    }

    /// Settings shared by every instance command. The name is checked
    /// here, before anything else happens.
    pub fn instance_settings(
        &self,
        name: &str,
        chart: ChartSource,
        tag: &TagArg,
        timeout: &TimeoutArg,
    ) -> Result<InstanceSettings> {
        validate_instance_name(name)?;

        let mut settings = InstanceSettings::new(name, chart, &self.defaults);
        settings.image_tag.clone_from(&tag.tag);
        if let Some(minutes) = timeout.timeout {
            settings.timeout_minutes = minutes;
        }
        settings.deploy_dir = self.deploy_dir();
        if let Some(registry) = &self.global.docker_registry {
            settings.docker_registry.clone_from(registry);
        }
        settings.loader_url.clone_from(&self.global.loader_url);
        Ok(settings)
    }

    /// Connect to the cluster and pick the helm build matching its version.
    pub async fn orchestrator(&self, deploy_dir: &Path) -> Result<Orchestrator> {
        let cluster = KubeCluster::connect()
            .await
            .context("Unable to connect to the Kubernetes cluster")?;

        let mut helm = HelmCli::new(deploy_dir);
        if !self.global.without_container {
            let version = cluster
                .server_version()
                .await
                .context("Unable to determine the Kubernetes version")?;
            debug!("Kubernetes version: {version}");
            helm = helm.with_helm_version(helm_version_for(&version));
        }

        let loader = DataLoadClient::new(self.global.ca_bundle.as_deref())?;
        Ok(Orchestrator::new(Arc::new(cluster), Arc::new(helm), loader))
    }
}

fn require_tag(settings: &InstanceSettings) -> Result<()> {
    if settings.image_tag.is_none() {
        return Err(MissingTagSnafu.build().into());
    }
    Ok(())
}

fn apply_overrides(settings: &mut InstanceSettings, overrides: &ValueOverrides) {
    settings.sets.clone_from(&overrides.sets);
    settings.set_strings.clone_from(&overrides.set_strings);
    settings.values.clone_from(&overrides.values);
}

pub async fn handle_install_command(ctx: &CommandContext, args: InstallArgs) -> Result<()> {
    let mut settings =
        ctx.instance_settings(&args.name, args.chart.source(), &args.tag, &args.timeout)?;
    require_tag(&settings)?;
    apply_overrides(&mut settings, &args.overrides);
    settings.augmentations = args.augmentations;
    settings.config_override = args.config_override;
    settings.ingress_port = args.port.map(|port| port.to_string());
    settings.reuse_namespace = args.reuse_namespace;
    settings.dry_run = DryRun::from_count(args.dry_run);
    settings.wallet_path = args.wallet_path;
    settings.istio = !args.no_istio;

    let orchestrator = ctx.orchestrator(&settings.deploy_dir).await?;
    orchestrator.install(&settings).await?;
    Ok(())
}

pub async fn handle_upgrade_command(ctx: &CommandContext, args: UpgradeArgs) -> Result<()> {
    let chart = chart_source(args.chart.as_deref());
    let mut settings = ctx.instance_settings(&args.name, chart, &args.tag, &args.timeout)?;
    require_tag(&settings)?;
    apply_overrides(&mut settings, &args.overrides);
    settings.augmentations = args.augmentations;
    settings.dry_run = DryRun::from_count(args.dry_run);

    let orchestrator = ctx.orchestrator(&settings.deploy_dir).await?;
    orchestrator.upgrade(&settings).await?;
    Ok(())
}

pub async fn handle_uninstall_command(ctx: &CommandContext, args: UninstallArgs) -> Result<()> {
    let mut settings =
        ctx.instance_settings(&args.name, ChartSource::Installed, &args.tag, &args.timeout)?;
    settings.reuse_namespace = args.reuse_namespace;

    let orchestrator = ctx.orchestrator(&settings.deploy_dir).await?;
    orchestrator.uninstall(&settings).await?;
    Ok(())
}

pub async fn handle_reconfig_command(ctx: &CommandContext, args: ReconfigArgs) -> Result<()> {
    let mut settings =
        ctx.instance_settings(&args.name, ChartSource::Installed, &args.tag, &args.timeout)?;
    let Some(config_override) = args.config_override else {
        return Err(MissingConfigOverrideSnafu.build().into());
    };
    settings.config_override = Some(config_override);
    settings.ingress_port = args.port.map(|port| port.to_string());

    let orchestrator = ctx.orchestrator(&settings.deploy_dir).await?;
    orchestrator.reconfigure(&settings).await?;
    Ok(())
}

pub async fn handle_list_command(ctx: &CommandContext, args: ListArgs) -> Result<()> {
    if let Some(name) = &args.name {
        validate_instance_name(name)?;
    }
    let filter = ListFilter {
        name: args.name,
        user: args.user,
        instance_type: args.instance_type,
        show_all: args.all,
    };

    let orchestrator = ctx.orchestrator(&ctx.deploy_dir()).await?;
    let rows = orchestrator.list(&filter).await?;
    print!("{}", render_instances(&rows));
    Ok(())
}

pub async fn handle_ingress_command(ctx: &CommandContext, args: IngressArgs) -> Result<()> {
    let mut settings = ctx.instance_settings(
        &args.name,
        ChartSource::Installed,
        &TagArg::default(),
        &TimeoutArg::default(),
    )?;
    settings.ingress_port = args.port.map(|port| port.to_string());

    let orchestrator = ctx.orchestrator(&settings.deploy_dir).await?;
    let routes = orchestrator
        .ingress_routes(&settings, args.service.as_deref())
        .await?;

    if args.service.is_some() {
        // The first matching URL, for use in scripts
        if let Some(route) = routes.first() {
            println!("{}", route.url);
        }
    } else {
        print!("{}", render_routes(&routes));
    }
    Ok(())
}

/// Run one parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = CommandContext::new(cli.global);
    debug!("Deploy directory: {}", ctx.deploy_dir().display());

    match cli.command {
        Commands::Install(args) => handle_install_command(&ctx, args).await,
        Commands::Upgrade(args) => handle_upgrade_command(&ctx, args).await,
        Commands::Uninstall(args) => handle_uninstall_command(&ctx, args).await,
        Commands::Reconfig(args) => handle_reconfig_command(&ctx, args).await,
        Commands::List(args) => handle_list_command(&ctx, args).await,
        Commands::Ingress(args) => handle_ingress_command(&ctx, args).await,
        Commands::Augment(cmd) => handle_augment_command(&ctx, cmd).await,
    }
}
