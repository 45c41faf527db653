use anyhow::Result;
use env_logger::Env;
use grainstat::ensemble::Ensemble;
use grainstat::settings;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = settings::load_config()?;
    let ensemble = Ensemble::load(settings)?;

    ensemble.run()
}
