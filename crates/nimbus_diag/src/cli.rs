use crate::callbacks::grouping::GroupsArgs;
use crate::config::ConfigArgs;
use crate::demo::ValidateArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Nimbus validation diagnostics", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a synthetic validation with all diagnostics callbacks
    Validate(ValidateArgs),

    /// Show how parameters are grouped in the loss plot
    Groups(GroupsArgs),

    /// Print the effective diagnostics config as YAML
    Config(ConfigArgs),
}
