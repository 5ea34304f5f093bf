use clap::{CommandFactory, Parser};
use commandfuzz::cli;
use commandfuzz::error::FuzzError;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    if args.missing_required() {
        let _ = cli::Cli::command().print_help();
        std::process::exit(1);
    }
    cli::init_logging(args.verbose);

    match cli::run(args).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            let fuzz_err = e.downcast_ref::<FuzzError>();
            if matches!(fuzz_err, Some(FuzzError::Interrupted)) {
                eprintln!("\r\x1b[K[!] Interrupted, aborting");
            } else {
                eprintln!("Error: {e:#}");
            }
            std::process::exit(fuzz_err.map(FuzzError::exit_code).unwrap_or(1));
        }
    }
}
