use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    fmt,
};
use serde::{
    Serialize, Deserialize
};

use crate::{
    keys::UserId,
    program::ProgramId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NadaType {
    SecretInteger,
    Integer,
    SecretUnsignedInteger,
    UnsignedInteger,
    SecretBoolean,
    Boolean,
}

impl NadaType {
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            NadaType::SecretInteger | NadaType::SecretUnsignedInteger | NadaType::SecretBoolean
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NadaValue {
    SecretInteger(i64),
    Integer(i64),
    SecretUnsignedInteger(u64),
    UnsignedInteger(u64),
    SecretBoolean(bool),
    Boolean(bool),
}

impl NadaValue {
    pub fn value_type(&self) -> NadaType {
        match self {
            NadaValue::SecretInteger(_) => NadaType::SecretInteger,
            NadaValue::Integer(_) => NadaType::Integer,
            NadaValue::SecretUnsignedInteger(_) => NadaType::SecretUnsignedInteger,
            NadaValue::UnsignedInteger(_) => NadaType::UnsignedInteger,
            NadaValue::SecretBoolean(_) => NadaType::SecretBoolean,
            NadaValue::Boolean(_) => NadaType::Boolean,
        }
    }

    pub fn is_secret(&self) -> bool {
        self.value_type().is_secret()
    }

    // widened so that signed and unsigned operands mix without overflow
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            NadaValue::SecretInteger(v) | NadaValue::Integer(v) => Some(i128::from(*v)),
            NadaValue::SecretUnsignedInteger(v) | NadaValue::UnsignedInteger(v) => Some(i128::from(*v)),
            NadaValue::SecretBoolean(_) | NadaValue::Boolean(_) => None,
        }
    }
}

impl fmt::Display for NadaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NadaValue::SecretInteger(v) | NadaValue::Integer(v) => write!(f, "{v}"),
            NadaValue::SecretUnsignedInteger(v) | NadaValue::UnsignedInteger(v) => write!(f, "{v}"),
            NadaValue::SecretBoolean(v) | NadaValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// Named values handed to storage or supplied at compute time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NadaValues(BTreeMap<String, NadaValue>);

impl NadaValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: NadaValue) -> Option<NadaValue> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&NadaValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NadaValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl<K: Into<String>, const N: usize> From<[(K, NadaValue); N]> for NadaValues {
    fn from(entries: [(K, NadaValue); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K: Into<String>> FromIterator<(K, NadaValue)> for NadaValues {
    fn from_iter<I: IntoIterator<Item = (K, NadaValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for NadaValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (index, (name, value)) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{name}': {value}")?;
        }
        write!(f, "}}")
    }
}

/// Access control attached to stored values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub owner: UserId,
    pub retrieve: BTreeSet<UserId>,
    pub update: BTreeSet<UserId>,
    pub delete: BTreeSet<UserId>,
    // <user, programs the user may run over these values>
    pub compute: BTreeMap<UserId, BTreeSet<ProgramId>>,
}

impl Permissions {
    // the owner may retrieve, update and delete, but compute must be granted explicitly
    pub fn default_for_user(user_id: UserId) -> Self {
        Self {
            owner: user_id,
            retrieve: BTreeSet::from([user_id]),
            update: BTreeSet::from([user_id]),
            delete: BTreeSet::from([user_id]),
            compute: BTreeMap::new(),
        }
    }

    pub fn add_compute_permissions<I, P>(&mut self, grants: I)
    where
        I: IntoIterator<Item = (UserId, P)>,
        P: IntoIterator<Item = ProgramId>,
    {
        for (user_id, programs) in grants {
            self.compute
                .entry(user_id)
                .or_default()
                .extend(programs);
        }
    }

    pub fn allows_compute(&self, user_id: &UserId, program_id: &ProgramId) -> bool {
        self.compute
            .get(user_id)
            .is_some_and(|programs| programs.contains(program_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::UserKey;

    #[test]
    fn compute_is_not_granted_by_default() {
        let user_id = UserKey::from_seed("my_seed").user_id();
        let program_id = ProgramId::new(user_id, "my_telemetry_program");
        let mut permissions = Permissions::default_for_user(user_id);
        assert!(permissions.retrieve.contains(&user_id));
        assert!(!permissions.allows_compute(&user_id, &program_id));

        permissions.add_compute_permissions([(user_id, [program_id.clone()])]);
        assert!(permissions.allows_compute(&user_id, &program_id));

        let other = ProgramId::new(user_id, "another_program");
        assert!(!permissions.allows_compute(&user_id, &other));
    }

    #[test]
    fn values_display_like_a_mapping() {
        let values = NadaValues::from([
            ("b", NadaValue::SecretInteger(-3)),
            ("a", NadaValue::UnsignedInteger(7)),
        ]);
        assert_eq!(values.to_string(), "{'a': 7, 'b': -3}");
        assert!(values.get("b").unwrap().is_secret());
        assert_eq!(values.get("a").unwrap().as_integer(), Some(7));
        assert_eq!(NadaValue::Boolean(true).as_integer(), None);
    }
}
