use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;

use ntrip_caster::caster::Caster;
use ntrip_caster::config::{Cli, Config};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    simple_logger::init_with_level(config.log.level.as_level())?;

    log::info!("binding caster on {}", config.bind);
    let mut caster = Caster::bind(&config)?;
    caster.run()
}
