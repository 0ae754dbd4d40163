//! The request-lifecycle engine: permission resolution, instance selection,
//! the request state machine, downstream dispatch, status reconciliation,
//! the job scheduler, category cache, and settings service (§2, components
//! B through J).

pub mod category_cache;
pub mod dispatcher;
pub mod permissions;
pub mod reconciler;
pub mod requests;
pub mod scheduler;
pub mod secrets;
pub mod selector;
pub mod settings_service;

pub use dispatcher::IntegrationDispatcher;
pub use permissions::PermissionsEngine;
pub use requests::RequestService;
pub use selector::InstanceSelector;
