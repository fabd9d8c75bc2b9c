use crate::catalog::{initialize_catalog, Catalog};
use crate::cli::CommandLineArgs;
use crate::database::Database;
use crate::error::EpidataError;
use crate::meta::MetaCache;
use crate::resource_manager::ResourceManager;

use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    /// Signal catalog, loaded once at startup.
    pub catalog: Catalog,

    /// Observation database.
    pub database: Database,

    /// Last computed signal metadata.
    pub meta: MetaCache,
}

impl AppState {
    /// Create and return an [AppState].
    ///
    /// Loads the signal catalog and creates the database schema if necessary.
    pub fn new(args: &CommandLineArgs) -> Result<Self, EpidataError> {
        let catalog =
            initialize_catalog(args.sources_file.as_deref(), args.signals_file.as_deref())?;
        let database = Database::new(&args.database);
        database.initialize()?;
        Ok(Self {
            args: args.clone(),
            resource_manager: ResourceManager::new(args.connection_limit),
            catalog,
            database,
            meta: MetaCache::default(),
        })
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
