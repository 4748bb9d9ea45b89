//! Rule configuration service and its collaborators.

mod archive;
mod cache;
mod config_service;
mod migration;
mod notify;
mod pagination;

pub use archive::{VersionArchive, DEFAULT_VERSION_LIMIT};
pub use cache::ConfigCache;
pub use config_service::{ConfigExport, ConfigService};
pub use migration::{migrate_from_old_format, MigrationOutcome};
pub use notify::{
    BroadcastNotifier, ChangeEvent, ChangeNotifier, NoopNotifier, TracingNotifier, CONFIG_UPDATE,
};
pub use pagination::{
    paginate, Page, PageRequest, PageWindow, PaginationMeta, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
