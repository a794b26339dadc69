//! Station entry point — CLI wiring and config-driven engine construction.

use std::path::Path;
use std::process;

use station_sim::config::StationConfig;
use station_sim::station::Station;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    speedup: Option<f64>,
    #[cfg(feature = "api")]
    port: u16,
}

fn print_help() {
    eprintln!("station-sim — EV charging-station admission and scheduling engine");
    eprintln!();
    eprintln!("Usage: station-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load station config from TOML file");
    eprintln!("  --preset <name>          Use a built-in preset (standard, compact)");
    eprintln!("  --speedup <f64>          Initial clock speedup factor");
    #[cfg(feature = "api")]
    eprintln!("  --port <u16>             API server port (default: 3000)");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the standard preset is used.");
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        speedup: None,
        #[cfg(feature = "api")]
        port: 3000,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    process::exit(1);
                }
                cli.config_path = Some(args[i].clone());
            }
            "--preset" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --preset requires a name argument");
                    process::exit(1);
                }
                cli.preset = Some(args[i].clone());
            }
            "--speedup" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --speedup requires a number argument");
                    process::exit(1);
                }
                if let Ok(s) = args[i].parse::<f64>() {
                    cli.speedup = Some(s);
                } else {
                    eprintln!("error: --speedup value \"{}\" is not a valid f64", args[i]);
                    process::exit(1);
                }
            }
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --port requires a u16 argument");
                    process::exit(1);
                }
                if let Ok(p) = args[i].parse::<u16>() {
                    cli.port = p;
                } else {
                    eprintln!("error: --port value \"{}\" is not a valid u16", args[i]);
                    process::exit(1);
                }
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Installs a default env-based tracing subscriber if none is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn main() {
    init_tracing();
    let cli = parse_args();

    // Load config: --config takes priority, then --preset, then standard
    let config = if let Some(ref path) = cli.config_path {
        match StationConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match StationConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        StationConfig::standard()
    };

    // Validate
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    // Build
    let station = match Station::new(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    if let Some(factor) = cli.speedup {
        if let Err(e) = station.clock().set_speedup(factor) {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }

    // Serve
    #[cfg(feature = "api")]
    {
        use std::net::SocketAddr;
        use std::sync::{Arc, Mutex};

        let state = Arc::new(station_sim::api::AppState {
            station: Mutex::new(station),
        });
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
            eprintln!("error: failed to create tokio runtime: {e}");
            process::exit(1);
        });
        rt.block_on(station_sim::api::serve(state, addr));
    }

    #[cfg(not(feature = "api"))]
    {
        let mut station = station;
        for pile in station.pile_status() {
            println!(
                "pile {} [{}] {:?} at {} units/h",
                pile.pile_id, pile.mode, pile.state, pile.rate
            );
        }
        eprintln!("built without the \"api\" feature; nothing to serve");
    }
}
