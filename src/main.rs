use chrono::Local;
use clap::{Command, CommandFactory, Parser};
use clap_complete::{generate, Generator};
use cnn_accel::{cmd_args::Args, runner, utils, CnnAccelResult, Settings};
use std::{error::Error, io};

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    if let Some(generator) = args.generator {
        let mut cmd = Args::command();
        eprintln!("Generating completion file for {:?}...", generator);
        print_completions(generator, &mut cmd);
        return Ok(());
    }
    utils::init_log();
    let current_time: String = Local::now().format("%Y-%m-%d-%H-%M-%S%.6f").to_string();

    let config_names = if args.config_names.is_empty() {
        vec!["configs/default.toml".into()]
    } else {
        args.config_names
    };
    let settings = Settings::new(config_names)?;
    let mut results = CnnAccelResult::new();
    results.settings = Some(settings.clone());
    // create the folder for output
    std::fs::create_dir_all("output")?;

    let stat = runner::simulate(&settings)?;
    results.stats = Some(stat);

    let output_path = format!("output/{}.json", current_time);
    println!("{}", serde_json::to_string_pretty(&results)?);
    // write json of results to output_path
    std::fs::write(output_path, serde_json::to_string_pretty(&results)?)?;
    Ok(())
}
