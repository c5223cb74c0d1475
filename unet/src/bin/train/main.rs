mod args;
mod training;
mod utils;

use args::Args;
use clap::Parser;
use log::LevelFilter;
use simplelog::{Config as LogConfig, SimpleLogger};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use unet::config::Config;
use unet::dataset::{PhantomDataset, SampleShape};

use training::trainer::Trainer;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    SimpleLogger::init(LevelFilter::Info, LogConfig::default())?;

    let config = Config::load(&args.config)?;
    log::info!("Loaded configuration from {:?}", args.config);

    // Finish the running epoch on Ctrl-C
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_handler = Arc::clone(&stop_flag);
    ctrlc::set_handler(move || {
        log::info!("Received SIGINT, stopping after this epoch...");
        stop_flag_handler.store(true, Ordering::Relaxed);
    })?;

    let shape = SampleShape::from_info(&config.image);
    let paths = &config.paths;
    let mut train = PhantomDataset::new(&paths.train_img_dir, &paths.train_mask_dir, shape)?;
    let val = PhantomDataset::new(&paths.val_img_dir, &paths.val_mask_dir, shape)?;
    let test = match paths.test_dirs() {
        Some((img_dir, mask_dir)) => Some(PhantomDataset::new(img_dir, mask_dir, shape)?),
        None => None,
    };

    let mut trainer = Trainer::new(&args, config, &train, stop_flag)?;
    trainer.train(&mut train, &val)?;

    if let Some(test) = test {
        trainer.submit(&test)?;
    }

    log::info!("Done!");
    Ok(())
}
