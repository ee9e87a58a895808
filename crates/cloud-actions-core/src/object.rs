//! Cloud object addressing.

use serde::{Deserialize, Serialize};

/// Address of a server-managed stateful instance.
///
/// The instance id is the only mutable part: it is filled in from the
/// server's instantiate response when the caller did not supply one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudObjectHandle {
    pub class_id: String,
    pub instance_id: Option<String>,
}

impl CloudObjectHandle {
    /// Handle for a new instance; the server assigns the instance id.
    #[must_use]
    pub fn new(class_id: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            instance_id: None,
        }
    }

    /// Handle for an existing instance.
    #[must_use]
    pub fn with_instance(class_id: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            instance_id: Some(instance_id.into()),
        }
    }
}
