use crate::Result;
use clap::Parser;
use elevfill_dem::{BatchMode, DemConfig};
use std::path::{Path, PathBuf};

/// Fill missing elevations of `lat lon [elevation]` records from USGS NED
/// 1/3 arc-second tiles, downloading tiles as needed.
#[derive(Parser, Debug, Clone)]
#[command(name = "elevfill", version)]
pub struct Args {
    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding tile archives and rasters [default: ~/gps/dem].
    #[arg(long)]
    pub dem_root: Option<PathBuf>,

    /// Abort on the first record whose elevation cannot be found.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Input file; stdin if omitted or `-`.
    pub input: Option<PathBuf>,
}

impl Args {
    /// Configuration file (or defaults) with command line overrides applied.
    pub fn load_config(&self) -> Result<DemConfig> {
        let mut config = match &self.config {
            Some(path) => DemConfig::from_yaml_file(path)?,
            None => DemConfig::default(),
        };
        if let Some(root) = &self.dem_root {
            config.root = root.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn batch_mode(&self) -> BatchMode {
        if self.fail_fast {
            BatchMode::FailFast
        } else {
            BatchMode::BestEffort
        }
    }

    /// Input path, `None` for stdin.
    pub fn input_path(&self) -> Option<&Path> {
        self.input.as_deref().filter(|p| *p != Path::new("-"))
    }
}
