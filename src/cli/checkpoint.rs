use super::run::{load, require_config_path, RunError};
use crate::storage::{self, CheckpointError};
use std::path::PathBuf;

/// Print the stored checkpoint for the configured zone as JSON.
///
/// Never writes to the backend, so a corrupt checkpoint is left in place.
pub async fn show(config_path: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(&require_config_path(config_path)?)?;
    let storage = storage::from_config(&config.checkpoint, &config.source.zone_tag);
    let location = storage.location();

    match storage::read_stored(storage.as_ref()).await? {
        Some(checkpoint) => {
            let json = serde_json::to_string_pretty(&checkpoint).map_err(CheckpointError::from)?;
            println!("{}", json);
            eprintln!("location: {}", location);
        }
        None => eprintln!("No checkpoint stored at {}", location),
    }
    Ok(())
}
