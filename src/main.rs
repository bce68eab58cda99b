use anyhow::Result;
use clap::Parser;
use log::info;

use dbrec::app::{App, Args};
use dbrec::util;

fn main() -> Result<()> {
    let args = Args::parse();
    util::init_logs(Some(args.log_path.as_path()), &args.log_level);

    let mut app = App::new();
    app.run(args.command)?;

    info!("time costs {:?}", app.time_costs());
    Ok(())
}
