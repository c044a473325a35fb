//! Naming shared by every resource provisioned for a VPCEndpoint

use std::fmt;

/// Name and namespace of the owning VPCEndpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub name: String,
    pub namespace: String,
}

impl ResourceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Name given to the generated security group
    pub fn group_name(&self) -> String {
        format!("{}-generic", self.name)
    }

    /// Value of the `Name` tag on every AWS resource
    pub fn tag_name(&self) -> String {
        format!("{}-{}", self.name, self.namespace)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
