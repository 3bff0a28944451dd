pub mod config;
pub mod document;
pub mod error;
pub mod folders;
pub mod listeners;
pub mod model;
pub mod provider;
pub mod query;
pub mod store;
pub mod transaction;
pub mod validation;

pub use config::{AutoIdStrategy, StoreOptions};
pub use document::Document;
pub use error::{Result, StoreError};
pub use folders::{register_folders, EntityRef, FolderExtension, Folders, HierarchyItem, MoveRequest};
pub use model::{parse_model, parse_model_str, EntitySetDefinition, FieldDescriptor, Fields, Model};
pub use provider::{MemoryProvider, Provider, ProviderOptions};
pub use query::{SortDirection, Update, UpdateOptions};
pub use store::{Collection, Cursor, DocumentStore, StoreExtension};
pub use transaction::Context;
