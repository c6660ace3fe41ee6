//! Tri-state attribute values.
//!
//! An attribute in a desired-state document is either not mentioned at all,
//! explicitly empty, or set to a value. Only the last two are owned by the
//! engine; an unmentioned attribute is never read, compared or written.
//!
//! In JSON documents a missing key decodes to [`Attr::Unset`] and an explicit
//! `null` decodes to [`Attr::Empty`]. Fields holding an `Attr` must be marked
//! `#[serde(default, skip_serializing_if = "Attr::is_unset")]`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr<T> {
    /// Not declared; the remote value is left alone.
    Unset,
    /// Declared as absent; a remote value gets cleared.
    Empty,
    /// Declared with a concrete value.
    Value(T),
}

impl<T> Default for Attr<T> {
    fn default() -> Self {
        Attr::Unset
    }
}

impl<T> Attr<T> {
    /// Maps a remote reading: present values become [`Attr::Value`],
    /// absent ones [`Attr::Empty`].
    pub fn from_remote(remote: Option<T>) -> Self {
        match remote {
            Some(v) => Attr::Value(v),
            None => Attr::Empty,
        }
    }

    /// Maps a remote reading for import, where absent means not owned.
    pub fn from_import(remote: Option<T>) -> Self {
        match remote {
            Some(v) => Attr::Value(v),
            None => Attr::Unset,
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Attr::Unset)
    }

    pub fn is_declared(&self) -> bool {
        !self.is_unset()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Attr::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Attr<&T> {
        match self {
            Attr::Unset => Attr::Unset,
            Attr::Empty => Attr::Empty,
            Attr::Value(v) => Attr::Value(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attr<U> {
        match self {
            Attr::Unset => Attr::Unset,
            Attr::Empty => Attr::Empty,
            Attr::Value(v) => Attr::Value(f(v)),
        }
    }

    /// Overwrites a declared attribute with the authoritative remote reading.
    /// Unset attributes stay unset.
    pub fn refresh(&mut self, remote: Option<T>) {
        if self.is_declared() {
            *self = Attr::from_remote(remote);
        }
    }
}

impl<T: Serialize> Serialize for Attr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Attr::Value(v) => v.serialize(serializer),
            Attr::Unset | Attr::Empty => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Attr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Attr::from_remote(Option::<T>::deserialize(deserializer)?))
    }
}
