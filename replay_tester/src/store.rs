use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use thermal_occupancy::core_modules::thermal_frame::grid_from_values;
use thermal_occupancy::{BackgroundMatrix, BackgroundStore, CounterError, MemoryStore};

/// On-disk form of a calibrated background.
#[derive(Debug, Serialize, Deserialize)]
struct StoredBackground {
    width: u32,
    height: u32,
    values: Vec<f32>,
    std_dev: Vec<f32>,
}

impl StoredBackground {
    fn from_matrix(background: &BackgroundMatrix) -> Self {
        let (width, height) = background.shape();
        Self {
            width,
            height,
            values: background.values().to_vec(),
            std_dev: background.std_dev().as_raw().clone(),
        }
    }

    fn into_matrix(self) -> thermal_occupancy::Result<BackgroundMatrix> {
        let std_dev = grid_from_values(self.width, self.height, self.std_dev)?;
        BackgroundMatrix::from_values(self.width, self.height, self.values)?.with_std_dev(std_dev)
    }
}

/// Keeps the background in a JSON file, or only in memory when no path is given.
pub struct JsonFileStore {
    path: Option<PathBuf>,
    memory: MemoryStore,
}

impl JsonFileStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            memory: MemoryStore::default(),
        }
    }

    pub fn has_background(&self) -> bool {
        self.path.as_ref().is_some_and(|path| path.exists())
    }

    fn read(&self) -> Option<BackgroundMatrix> {
        let path = self.path.as_ref()?;
        let file = File::open(path).ok()?;
        let stored: StoredBackground = match serde_json::from_reader(BufReader::new(file)) {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!("Ignoring unreadable background {}: {}", path.display(), err);
                return None;
            }
        };
        match stored.into_matrix() {
            Ok(background) => Some(background),
            Err(err) => {
                log::warn!("Ignoring malformed background {}: {}", path.display(), err);
                None
            }
        }
    }
}

impl BackgroundStore for JsonFileStore {
    fn load_background(&mut self) -> Option<BackgroundMatrix> {
        self.memory.load_background().or_else(|| self.read())
    }

    fn save_background(&mut self, background: &BackgroundMatrix) -> thermal_occupancy::Result<()> {
        self.memory.save_background(background)?;
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = File::create(path)
            .map_err(|err| CounterError::persistence(format!("{}: {}", path.display(), err)))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &StoredBackground::from_matrix(background))
            .map_err(|err| CounterError::persistence(format!("{}: {}", path.display(), err)))?;
        writer
            .flush()
            .map_err(|err| CounterError::persistence(format!("{}: {}", path.display(), err)))?;
        log::info!("Saved background to {}", path.display());
        Ok(())
    }
}
