use qplayer::app::AppOptions;
use qplayer::config::{self, PlayerConfig};
use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    music_dir: Option<PathBuf>,
    null_audio: bool,
    init_config: bool,
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if args.init_config {
        let config = PlayerConfig {
            music_dir: args.music_dir,
            ..config::load_config()?
        };
        let path = config::save_config(&config)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    qplayer::app::run(AppOptions {
        music_dir: args.music_dir,
        null_audio: args.null_audio,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--dir requires a folder path");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--dir cannot be empty");
                }
                out.music_dir = Some(PathBuf::from(value.trim()));
            }
            "--null-audio" => out.null_audio = true,
            "--init-config" => out.init_config = true,
            "-v" | "--verbose" => out.verbose = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("qplayer");
    println!("  --dir <path>      Music folder to scan");
    println!("  --null-audio      Run without an audio device");
    println!("  --init-config     Write the config file and exit");
    println!("  -v, --verbose     Debug logging");
}
