use std::{collections::BTreeMap, ops::Deref};

use async_graphql_value::{ConstValue, Name};
use serde::{Deserialize, Deserializer, Serialize};

/// Variables of an operation, sorted by name.
///
/// Requests carry them as sent by the client. Once the operation is prepared they hold the
/// coerced values, defaults applied, and are shared by the executor and the cache keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<Name, ConstValue>);

impl Variables {
    /// Variables from a JSON object. Anything else yields no variables.
    pub fn from_json(value: serde_json::Value) -> Self {
        match ConstValue::from_json(value) {
            Ok(ConstValue::Object(object)) => Self(object.into_iter().collect()),
            _ => Self::default(),
        }
    }

    pub fn insert(&mut self, name: Name, value: ConstValue) -> Option<ConstValue> {
        self.0.insert(name, value)
    }

    pub(crate) fn remove(&mut self, name: &Name) -> Option<ConstValue> {
        self.0.remove(name)
    }

    pub fn into_json(self) -> serde_json::Value {
        ConstValue::Object(self.0.into_iter().collect())
            .into_json()
            .unwrap_or_default()
    }
}

impl<'de> Deserialize<'de> for Variables {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(
            <Option<BTreeMap<Name, ConstValue>>>::deserialize(deserializer)?.unwrap_or_default(),
        ))
    }
}

impl Deref for Variables {
    type Target = BTreeMap<Name, ConstValue>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<(Name, ConstValue)> for Variables {
    fn from_iter<T: IntoIterator<Item = (Name, ConstValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
