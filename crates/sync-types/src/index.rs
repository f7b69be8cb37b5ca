//! Logical index identification.

use serde::{Deserialize, Serialize};

use crate::config::StoreSettings;
use crate::entity::EntityKind;

/// Suffix marking the staging twin of an index.
pub const TMP_SUFFIX: &str = "_tmp";

/// Identifies a target index for one build call.
///
/// The name is derived as `prefix + store code + suffix`, plus `_tmp` for
/// the staging twin, unless an enforced name is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub store_id: u32,
    pub index_suffix: String,
    pub is_temporary: bool,
    pub enforced_index_name: Option<String>,
}

impl IndexOptions {
    /// Production index options for an entity kind.
    pub fn for_kind(store_id: u32, kind: EntityKind) -> Self {
        Self {
            store_id,
            index_suffix: kind.index_suffix().to_string(),
            is_temporary: false,
            enforced_index_name: None,
        }
    }

    /// Options pinned to a literal index name.
    pub fn enforced(store_id: u32, name: impl Into<String>) -> Self {
        Self {
            store_id,
            index_suffix: String::new(),
            is_temporary: false,
            enforced_index_name: Some(name.into()),
        }
    }

    /// The staging twin of these options.
    pub fn temporary(&self) -> Self {
        Self {
            is_temporary: true,
            ..self.clone()
        }
    }

    /// Resolve the index name for a store.
    ///
    /// An enforced name is used verbatim; its staging twin appends `_tmp`.
    pub fn index_name(&self, store: &StoreSettings) -> String {
        let base = match &self.enforced_index_name {
            Some(name) => name.clone(),
            None => format!("{}{}{}", store.index_prefix, store.code, self.index_suffix),
        };
        if self.is_temporary {
            format!("{}{}", base, TMP_SUFFIX)
        } else {
            base
        }
    }
}
