//! Cosigned - deferred multi-party transactions
//!
//! Single binary with subcommands:
//!   cosigned keygen   - Generate a co-signer key
//!   cosigned sign     - Sign a message with a seed
//!   cosigned demo     - Run the co-signing walkthrough

mod demo;
mod keygen;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let rest = args.get(2..).unwrap_or_default();

    match args.get(1).map(String::as_str) {
        Some("keygen") => keygen::run_keygen(rest),
        Some("sign") => {
            if let Err(e) = keygen::run_sign(rest) {
                eprintln!("Sign error: {e:#}");
                std::process::exit(1);
            }
        }
        Some("demo") => {
            if let Err(e) = run_demo(rest) {
                eprintln!("Demo error: {e:#}");
                std::process::exit(1);
            }
        }
        Some("--version" | "-V") => {
            println!("cosigned {}", cosigned::VERSION);
        }
        _ => print_help(),
    }
}

fn run_demo(args: &[String]) -> anyhow::Result<()> {
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str);
    let config = demo::load_config(config_path)?;

    // RUST_LOG wins over the configured filter
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    demo::run(&config)
}

fn print_help() {
    println!("Cosigned v{}", cosigned::VERSION);
    println!("Deferred, multi-party co-signed ledger transactions");
    println!();
    println!("USAGE:");
    println!("    cosigned [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    keygen      Generate a co-signer key");
    println!("                  --mldsa      Use ML-DSA-65 instead of Ed25519");
    println!("    sign        Sign a hex message");
    println!("                  --seed <HEX>     Signer seed");
    println!("                  --message <HEX>  Message, e.g. an instruction hash");
    println!("                  --mldsa          Seed is an ML-DSA-65 seed");
    println!("    demo        Run the co-signing walkthrough");
    println!("                  --config <PATH>  Node config TOML");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help      Print help");
    println!("    -V, --version   Print version");
}
