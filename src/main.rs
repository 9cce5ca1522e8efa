//! fabprog - Fabric FPGA serial programmer
//!
//! Uploads bitstreams to Fabric boards and manages the bitstream they keep in
//! flash. The board's programmer microcontroller is reached over USB serial;
//! when no port is given, attached programmers are discovered automatically.

mod cli;
mod commands;
mod connect;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use fabprog_protocol::SessionConfig;
use output::Output;

fn main() {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    // RUST_LOG applies unless -q or -v is given
    if let Some(level) = level_override(cli.quiet, cli.verbose) {
        logger.filter_level(level);
    }
    logger.init();

    let out = Output::new(cli.json, cli.quiet);

    if let Err(e) = run(cli, &out) {
        log::debug!("{:?}", e);
        out.error(&e.to_string(), e.exit_code());
        std::process::exit(e.exit_code());
    }
}

fn level_override(quiet: bool, verbose: u8) -> Option<log::LevelFilter> {
    match (quiet, verbose) {
        (true, _) => Some(log::LevelFilter::Warn),
        (false, 0) => None,
        (false, 1) => Some(log::LevelFilter::Debug),
        (false, _) => Some(log::LevelFilter::Trace),
    }
}

fn run(cli: Cli, out: &Output) -> error::Result<()> {
    let session = SessionConfig {
        baud_rate: cli.baud,
        ..SessionConfig::default()
    };
    let port = cli.port.as_deref();

    let mut service = connect::service(session);

    match cli.command {
        Commands::List => commands::run_list(&mut service, port, out),
        Commands::Test => {
            let uri = connect::select_device(&mut service, port, out)?;
            commands::run_test(&mut service, &uri, out)
        }
        Commands::Program { file, save } => {
            let uri = connect::select_device(&mut service, port, out)?;
            commands::run_program(&mut service, &uri, &file, save, out)
        }
        Commands::ClearFlash => {
            let uri = connect::select_device(&mut service, port, out)?;
            commands::run_clear_flash(&mut service, &uri, out)
        }
        Commands::QueryFlash => {
            let uri = connect::select_device(&mut service, port, out)?;
            commands::run_query_flash(&mut service, &uri, out)
        }
        Commands::LoadFromFlash => {
            let uri = connect::select_device(&mut service, port, out)?;
            commands::run_load_from_flash(&mut service, &uri, out)
        }
        Commands::Reboot => {
            let uri = connect::select_device(&mut service, port, out)?;
            commands::run_reboot(&mut service, &uri, out)
        }
        Commands::WriteBootloader { image, target_dir } => {
            commands::run_write_bootloader(&image, &target_dir, out).map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_override() {
        assert_eq!(level_override(false, 0), None);
        assert_eq!(level_override(false, 1), Some(log::LevelFilter::Debug));
        assert_eq!(level_override(false, 3), Some(log::LevelFilter::Trace));
        assert_eq!(level_override(true, 2), Some(log::LevelFilter::Warn));
    }
}
