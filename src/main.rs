use anyhow::Result;
use clap::{CommandFactory, Parser};
use sed_range::actions;
use sed_range::args::{Cli, Command};

fn init_logging(verbose: u8) {
    let default = if verbose > 0 { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Docs => {
            Cli::command().print_help()?;
            println!();
        }
        Command::Status { device } => actions::do_status(device)?,
        Command::Geometry { device } => actions::do_geometry(device)?,
        Command::Setup { device, segment, start, length, key, admin_key } => {
            actions::do_setup(device, segment, start, length, key, admin_key)?;
        }
        Command::Lock { device, segment } => actions::do_lock(device, segment)?,
        Command::Unlock { device, segment, key } => actions::do_unlock(device, segment, key)?,
        Command::Check { device, segment, start, length, key } => {
            actions::do_check(device, segment, start, length, key)?;
        }
        Command::FactoryReset { device, psid } => actions::do_factory_reset(device, psid)?,
        Command::ResetSegment { device, segment, admin_key } => {
            actions::do_reset_segment(device, segment, admin_key)?;
        }
    }
    Ok(())
}
