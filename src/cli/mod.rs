// src/cli/mod.rs

//! Command-line surface of the `fleetcfg` binary.

use clap::{Args, Parser, Subcommand};

pub mod handlers;

/// fleetcfg: builds per-component configuration for every deployment environment.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Config root containing `envs/` and `components/`.
    #[arg(long, short, global = true, default_value = ".")]
    pub root: String,

    /// Output directory used for `resultDir`. Defaults to `<root>/build`.
    #[arg(long, short, global = true)]
    pub destination: Option<String>,

    /// Extra `system` property (e.g., "-D deploy.user=ops"). Repeatable.
    #[arg(short = 'D', value_name = "KEY=VALUE", global = true)]
    pub defines: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lists every environment name, aliases included.
    Envs,
    /// Builds the resolved configuration of an environment.
    Build(BuildArgs),
    /// Resolves one raw value in the context of a component.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// The environment to build.
    pub env: String,

    /// Only build these components. Repeatable.
    #[arg(long = "component", short = 'c', value_name = "NAME")]
    pub components: Vec<String>,

    /// Print the result as JSON instead of `key = value` listings.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// The environment providing the context.
    pub env: String,

    /// The component whose properties `this` refers to.
    pub component: String,

    /// The raw value, e.g. "${this@url}".
    pub value: String,

    /// Config type used for unqualified references. Defaults to the first configured type.
    #[arg(long, short = 't')]
    pub config_type: Option<String>,
}
