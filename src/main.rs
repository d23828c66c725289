mod business;
mod cli;

use clap::Parser;
use cli::Cli;
use pgforge::ForgeError;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over -v
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_logging(args.verbose);

    if let Err(e) = business::handle_command(args).await {
        let (kind, code) = match e.downcast_ref::<ForgeError>() {
            Some(forge) => (forge.kind(), forge.exit_code()),
            None => ("internal", 1),
        };
        let body = serde_json::json!({
            "status": "error",
            "kind": kind,
            "message": e.to_string(),
        });
        println!("{body}");
        std::process::exit(code);
    }
}
