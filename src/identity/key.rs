//! `namespace/name` keys identifying objects in stores and queues

use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::error::{Error, Result};

/// Key of an object; cluster-scoped objects have no namespace
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            name: name.to_string(),
        }
    }

    /// Key of the object described by `meta`; objects without a name have none
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self> {
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::config("object has no name"))?;
        Ok(Self::new(meta.namespace.as_deref().unwrap_or_default(), name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split('/').collect::<Vec<_>>().as_slice() {
            [name] if !name.is_empty() => Ok(Self::new("", name)),
            [ns, name] if !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(Error::config(format!("unexpected key format: {:?}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_and_parse() {
        let key = ObjectKey::new("db", "demo");
        assert_eq!(key.to_string(), "db/demo");
        assert_eq!("db/demo".parse::<ObjectKey>().unwrap(), key);

        let cluster_scoped: ObjectKey = "node-1".parse().unwrap();
        assert_eq!(cluster_scoped.namespace, None);
        assert_eq!(cluster_scoped.to_string(), "node-1");

        assert!("a/b/c".parse::<ObjectKey>().is_err());
        assert!("db/".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_key_from_meta_requires_name() {
        let meta = ObjectMeta {
            namespace: Some("db".into()),
            ..Default::default()
        };
        assert!(ObjectKey::from_meta(&meta).is_err());
    }
}
