use anyhow::{anyhow, Result};
use clap::{arg, ArgAction, Command};
use ghost_optimizer::{
    layout::{from_tensors, to_tensors},
    optimize,
};
use ghost_problems::*;
use ghost_structs::core::{OutputData, RunSettings};
use ghost_utils::{compress_obj, decompress_obj, dejsonify, jsonify};
use log::info;
use std::{fs, io::Read, path::PathBuf};

fn cli() -> Command {
    Command::new("ghost-runtime")
        .about("Runs the stochastic ghost optimizer on a seeded problem instance or verifies its output")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Generates the problem instance and runs the optimizer")
                .arg(
                    arg!(<SETTINGS> "Settings json string or path to json file")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(<RAND_HASH> "A string used in seed generation")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(arg!(<NONCE> "Nonce value").value_parser(clap::value_parser!(u64)))
                .arg(
                    arg!(--output [OUTPUT_FILE] "If set, the output data will be saved to this file path (default json)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--compress "If output file is set, the output data will be compressed as zlib")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verifies the parameters of an output against its problem instance")
                .arg(
                    arg!(<SETTINGS> "Settings json string or path to json file")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(
                    arg!(<RAND_HASH> "A string used in seed generation")
                        .value_parser(clap::value_parser!(String)),
                )
                .arg(arg!(<NONCE> "Nonce value").value_parser(clap::value_parser!(u64)))
                .arg(
                    arg!(<OUTPUT> "Output json string, path to json or zlib file, or '-' for stdin")
                        .value_parser(clap::value_parser!(String)),
                ),
        )
}

fn main() {
    env_logger::init();
    let matches = cli().get_matches();

    if let Err(e) = match matches.subcommand() {
        Some(("run", sub_m)) => run(
            sub_m.get_one::<String>("SETTINGS").cloned().unwrap_or_default(),
            sub_m.get_one::<String>("RAND_HASH").cloned().unwrap_or_default(),
            sub_m.get_one::<u64>("NONCE").copied().unwrap_or_default(),
            sub_m.get_one::<PathBuf>("output").cloned(),
            sub_m.get_flag("compress"),
        ),
        Some(("verify", sub_m)) => verify(
            sub_m.get_one::<String>("SETTINGS").cloned().unwrap_or_default(),
            sub_m.get_one::<String>("RAND_HASH").cloned().unwrap_or_default(),
            sub_m.get_one::<u64>("NONCE").copied().unwrap_or_default(),
            sub_m.get_one::<String>("OUTPUT").cloned().unwrap_or_default(),
        ),
        _ => Err(anyhow!("Invalid subcommand")),
    } {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

pub fn run(
    settings: String,
    rand_hash: String,
    nonce: u64,
    output_file: Option<PathBuf>,
    compress: bool,
) -> Result<()> {
    let settings = load_settings(&settings)?;
    let seed = settings.calc_seed(&rand_hash, nonce)?;

    macro_rules! dispatch_problems {
        ( $( $p:ident ),+ $(,)? ) => {{
            match settings.problem_id.as_str() {
                $(
                    stringify!($p) => {
                        let difficulty = $p::Difficulty::try_from(settings.difficulty.clone())?;
                        let challenge = $p::Challenge::generate_instance(&seed, &difficulty)?;
                        let config = match settings.config() {
                            Some(config) => config.clone(),
                            None => challenge.default_config(),
                        };
                        let oracle = challenge.oracle()?;
                        optimize(&oracle, challenge.initial_params(), config, seed)?
                    }
                )+
                other => {
                    return Err(anyhow!(
                        "Unsupported problem '{}'. Expected one of {:?}",
                        other,
                        PROBLEM_IDS
                    ))
                }
            }
        }};
    }
    let outcome = dispatch_problems!(noisy_quadratic, fair_regression);

    info!(
        "{} finished: f {:?}, max c {:?}",
        settings.problem_id,
        outcome.trajectory.iterfs().last(),
        outcome.trajectory.itercs().last()
    );
    let output = OutputData {
        nonce,
        settings,
        params: to_tensors(&outcome.params),
        trajectory: outcome.trajectory,
    };
    match output_file {
        Some(path) => {
            if compress {
                fs::write(&path, compress_obj(&output)?)?;
            } else {
                fs::write(&path, jsonify(&output)?)?;
            }
            println!("output written to {}", path.display());
        }
        None => println!("{}", jsonify(&output)?),
    }
    Ok(())
}

pub fn verify(settings: String, rand_hash: String, nonce: u64, output: String) -> Result<()> {
    let settings = load_settings(&settings)?;
    let output = load_output(&output)?;
    if output.nonce != nonce {
        return Err(anyhow!(
            "Output nonce {} does not match {}",
            output.nonce,
            nonce
        ));
    }
    if output.settings != settings {
        return Err(anyhow!("Output was produced with different settings"));
    }
    let seed = settings.calc_seed(&rand_hash, nonce)?;
    let params = from_tensors(&output.params)?;

    macro_rules! dispatch_problems {
        ( $( $p:ident ),+ $(,)? ) => {{
            match settings.problem_id.as_str() {
                $(
                    stringify!($p) => {
                        let difficulty = $p::Difficulty::try_from(settings.difficulty.clone())?;
                        let challenge = $p::Challenge::generate_instance(&seed, &difficulty)?;
                        challenge.verify_solution(&params)
                    }
                )+
                other => Err(anyhow!(
                    "Unsupported problem '{}'. Expected one of {:?}",
                    other,
                    PROBLEM_IDS
                )),
            }
        }};
    }
    dispatch_problems!(noisy_quadratic, fair_regression)?;
    println!("output is valid");
    Ok(())
}

fn load_settings(settings: &str) -> Result<RunSettings> {
    let settings = if settings.ends_with(".json") {
        fs::read_to_string(settings)
            .map_err(|e| anyhow!("Failed to read settings file {}: {}", settings, e))?
    } else {
        settings.to_string()
    };
    dejsonify::<RunSettings>(&settings).map_err(|e| anyhow!("Failed to parse settings: {}", e))
}

fn load_output(output: &str) -> Result<OutputData> {
    let json = if output == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| anyhow!("Failed to read output from stdin: {}", e))?;
        buffer
    } else if output.ends_with(".json") {
        fs::read_to_string(output)
            .map_err(|e| anyhow!("Failed to read output file {}: {}", output, e))?
    } else if PathBuf::from(output).is_file() {
        let bytes =
            fs::read(output).map_err(|e| anyhow!("Failed to read output file {}: {}", output, e))?;
        return decompress_obj(&bytes);
    } else {
        output.to_string()
    };
    dejsonify::<OutputData>(&json).map_err(|e| anyhow!("Failed to parse output: {}", e))
}
