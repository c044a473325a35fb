//! AWS resource tags applied by the controller
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `Name` | `<name>-<namespace>` of the owning VPCEndpoint |
//! | `vpce.io/managed-by` | Static identifier ("vpce-controller") |
//! | `vpce.io/owner` | `<namespace>/<name>` of the owning VPCEndpoint |
//! | `vpce.io/created-at` | RFC 3339 tagging timestamp |

use crate::ResourceIdentity;

pub const TAG_NAME: &str = "Name";

pub const TAG_MANAGED_BY: &str = "vpce.io/managed-by";

pub const TAG_MANAGED_BY_VALUE: &str = "vpce-controller";

pub const TAG_OWNER: &str = "vpce.io/owner";

pub const TAG_CREATED_AT: &str = "vpce.io/created-at";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceTag {
    pub key: String,
    pub value: String,
}

impl ResourceTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Tags identifying a security group or endpoint owned by `identity`
pub fn resource_tags(identity: &ResourceIdentity) -> Vec<ResourceTag> {
    vec![
        ResourceTag::new(TAG_NAME, identity.tag_name()),
        ResourceTag::new(TAG_MANAGED_BY, TAG_MANAGED_BY_VALUE),
        ResourceTag::new(TAG_OWNER, identity.to_string()),
        ResourceTag::new(TAG_CREATED_AT, chrono::Utc::now().to_rfc3339()),
    ]
}
