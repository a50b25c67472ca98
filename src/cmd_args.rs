use clap::{Parser, ValueHint};
use clap_complete::Shell;

/// # Description
/// - run a network table through the simulated accelerator and write the statistics to
///   `output/<timestamp>.json`
/// - with no config file `configs/default.toml` is used
#[derive(Debug, Parser)]
#[clap(author,version="0.1.0",about="simulate a tiled fixed point cnn accelerator layer by layer",long_about=None,trailing_var_arg=true)]
pub struct Args {
    /// print a completion script for the given shell and exit without simulating
    #[clap(long = "generate", short = 'g', arg_enum)]
    pub generator: Option<Shell>,

    /// settings files in toml, merged in order so later files override earlier ones,
    /// every configs/user_configs/*.toml is applied last
    #[clap(value_hint=ValueHint::FilePath)]
    pub config_names: Vec<String>,
}
