use std::process::ExitCode;

use clap::Parser;
use site_backup_lib::cli::Cli;
use site_backup_lib::coordinator::{self, EXIT_FATAL, EXIT_SUCCESS};
use site_backup_lib::util::{logging, signal, CancellationToken};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose, Some(&cli.log_file)) {
        eprintln!("{e}");
        return ExitCode::from(EXIT_FATAL);
    }

    let ctx = cli.context();
    let token = CancellationToken::new();
    signal::install(ctx.lock_path.clone(), token.clone());

    let code = match coordinator::execute(&ctx, &token, coordinator::connect) {
        Ok(_) => EXIT_SUCCESS,
        Err(e) => e.exit_code(),
    };
    log::logger().flush();

    ExitCode::from(code)
}
