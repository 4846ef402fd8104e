use std::fmt;
use std::sync::Arc;

use crate::batch::BatchStrategy;
use crate::request::{PerRecordStrategy, RequestStrategy};

/// Construction options for a store.
///
/// `standalone` keeps the store out of the registry entirely; `server_only`
/// keeps it registered but exempt from speculative before-save routing.
#[derive(Clone)]
pub struct StoreOptions {
    pub name: String,
    pub standalone: bool,
    pub server_only: bool,
    pub id_properties: Vec<String>,
    pub item_module: String,
    pub list_module: String,
    /// Identifier of the server-side collection this store mirrors.
    pub collection: Option<String>,
    /// Record field naming the collection a record belongs to.
    pub parent_field: String,
    pub write_all_fields: bool,
    pub strategy: Arc<dyn RequestStrategy>,
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("name", &self.name)
            .field("standalone", &self.standalone)
            .field("server_only", &self.server_only)
            .field("id_properties", &self.id_properties)
            .field("item_module", &self.item_module)
            .field("list_module", &self.list_module)
            .field("collection", &self.collection)
            .field("parent_field", &self.parent_field)
            .field("write_all_fields", &self.write_all_fields)
            .field("batched", &self.strategy.is_batched())
            .finish()
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new("ipm")
    }
}

impl StoreOptions {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            item_module: format!("{}itemmodule", name),
            list_module: format!("{}listmodule", name),
            name,
            standalone: false,
            server_only: false,
            id_properties: vec!["entryid".to_string()],
            collection: None,
            parent_field: "parent_entryid".to_string(),
            write_all_fields: false,
            strategy: Arc::new(PerRecordStrategy),
        }
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    pub fn server_only(mut self) -> Self {
        self.server_only = true;
        self
    }

    pub fn with_id_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modules(mut self, item: impl Into<String>, list: impl Into<String>) -> Self {
        self.item_module = item.into();
        self.list_module = list.into();
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_parent_field(mut self, field: impl Into<String>) -> Self {
        self.parent_field = field.into();
        self
    }

    pub fn with_write_all_fields(mut self, all: bool) -> Self {
        self.write_all_fields = all;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RequestStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Send every mutation as one ordered list request.
    pub fn batched(self) -> Self {
        self.with_write_all_fields(true)
            .with_strategy(Arc::new(BatchStrategy))
    }
}
