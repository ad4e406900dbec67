// Model catalog: model id -> deployed endpoint

use crate::error::CatalogError;
use crate::file_manager::read_json_file_or_default;
use crate::models::ModelRecord;
use std::path::PathBuf;

pub trait ModelCatalog: Send + Sync {
    fn lookup(&self, model_id: u64) -> Result<Option<ModelRecord>, CatalogError>;
}

/// Reads the exported `models.json` on every lookup so newly deployed models
/// are picked up without a restart.
pub struct JsonModelCatalog {
    path: PathBuf,
}

impl JsonModelCatalog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ModelCatalog for JsonModelCatalog {
    fn lookup(&self, model_id: u64) -> Result<Option<ModelRecord>, CatalogError> {
        let models: Vec<ModelRecord> =
            read_json_file_or_default(&self.path).map_err(CatalogError::Unreadable)?;
        Ok(models.into_iter().find(|m| m.id == model_id))
    }
}

impl ModelCatalog for Vec<ModelRecord> {
    fn lookup(&self, model_id: u64) -> Result<Option<ModelRecord>, CatalogError> {
        Ok(self.iter().find(|m| m.id == model_id).cloned())
    }
}
