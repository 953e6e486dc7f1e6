//! `gmskube augment` subcommands

use std::path::PathBuf;

use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::{ArgAction, Args, Parser};

use super::{CommandContext, TagArg, TimeoutArg, chart_source, require_tag};
use crate::catalog::{load_catalog, render_catalog};
use crate::instance::{AUGMENTATIONS, validate_set};
use crate::settings::DryRun;

#[derive(Debug, Args, Clone)]
pub struct AugmentArgs {
    /// Name of the instance
    pub name: String,

    /// Augmentation to apply or delete
    #[clap(short = 'n', long = "name", value_parser = PossibleValuesParser::new(AUGMENTATIONS.iter().copied()))]
    pub augmentation: String,

    /// Local chart directory to upgrade with
    #[clap(long)]
    pub chart: Option<PathBuf>,

    /// Value for the augmentation, scoped under `augmentation.<name>.`
    #[clap(long = "set", value_name = "KEY=VALUE", value_parser = validate_set)]
    pub sets: Vec<String>,

    #[clap(flatten)]
    pub tag: TagArg,

    #[clap(flatten)]
    pub timeout: TimeoutArg,

    /// Validate the upgrade without applying it
    #[clap(long, action = ArgAction::Count)]
    pub dry_run: u8,
}

#[derive(Debug, Parser, Clone)]
pub enum AugmentCommands {
    /// Apply an augmentation to a running instance
    Apply(AugmentArgs),

    /// Delete an augmentation from a running instance
    Delete(AugmentArgs),

    /// List the augmentations that can be applied
    #[clap(alias = "cat")]
    Catalog {
        #[clap(flatten)]
        tag: TagArg,
    },
}

/// Handle augment commands
pub async fn handle_augment_command(ctx: &CommandContext, cmd: AugmentCommands) -> Result<()> {
    match cmd {
        AugmentCommands::Apply(args) => augment(ctx, args, true).await,
        AugmentCommands::Delete(args) => augment(ctx, args, false).await,
        AugmentCommands::Catalog { tag } => {
            if tag.tag.is_none() {
                return Err(crate::error::MissingTagSnafu.build().into());
            }
            let entries = load_catalog(&ctx.deploy_dir())?;
            print!("{}", render_catalog(&entries));
            Ok(())
        }
    }
}

async fn augment(ctx: &CommandContext, args: AugmentArgs, enable: bool) -> Result<()> {
    let chart = chart_source(args.chart.as_deref());
    let mut settings = ctx.instance_settings(&args.name, chart, &args.tag, &args.timeout)?;
    require_tag(&settings)?;
    settings.sets = args.sets;
    settings.dry_run = DryRun::from_count(args.dry_run);

    let orchestrator = ctx.orchestrator(&settings.deploy_dir).await?;
    if enable {
        orchestrator
            .apply_augmentation(&settings, &args.augmentation)
            .await?;
    } else {
        orchestrator
            .delete_augmentation(&settings, &args.augmentation)
            .await?;
    }
    Ok(())
}
