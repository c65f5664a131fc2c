//! Lossless serde forms for paths.
//!
//! Paths that are valid UTF-8 are written as plain strings. Any other path is
//! written as an array of its raw bytes, since file names may hold bytes a
//! JSON string cannot carry.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

struct PathRepr<'a>(&'a Path);

impl Serialize for PathRepr<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0.to_str() {
            Some(text) => serializer.serialize_str(text),
            None => serializer.collect_seq(self.0.as_os_str().as_bytes()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Text(String),
    Bytes(Vec<u8>),
}

struct PathBufRepr(PathBuf);

impl<'de> Deserialize<'de> for PathBufRepr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => PathBuf::from(text),
            Repr::Bytes(bytes) => PathBuf::from(OsString::from_vec(bytes)),
        }))
    }
}

pub(crate) mod option {
    use super::*;

    pub fn serialize<S>(path: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        path.as_deref().map(PathRepr).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<PathBufRepr>::deserialize(deserializer)?.map(|repr| repr.0))
    }
}

pub(crate) mod set {
    use super::*;

    pub fn serialize<S>(paths: &BTreeSet<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(paths.iter().map(|path| PathRepr(path)))
    }
}

pub(crate) mod pairs {
    use super::*;

    pub fn serialize<S>(pairs: &BTreeSet<(PathBuf, PathBuf)>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(
            pairs
                .iter()
                .map(|(from, to)| (PathRepr(from), PathRepr(to))),
        )
    }
}

/// A path-keyed map, as a sequence of `[path, value]` pairs.
///
/// JSON object keys must be strings, which byte paths are not.
pub(crate) mod entries {
    use super::*;

    pub fn serialize<S, T>(map: &BTreeMap<PathBuf, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        serializer.collect_seq(map.iter().map(|(path, value)| (PathRepr(path), value)))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeMap<PathBuf, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Vec::<(PathBufRepr, T)>::deserialize(deserializer)?
            .into_iter()
            .map(|(path, value)| (path.0, value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::option")]
        root: Option<PathBuf>,
        #[serde(with = "super::entries")]
        entries: BTreeMap<PathBuf, u32>,
    }

    fn non_utf8() -> PathBuf {
        PathBuf::from(OsStr::from_bytes(b"/a/bad\xff"))
    }

    #[test]
    fn utf8_paths_are_strings() {
        let holder = Holder {
            root: Some(PathBuf::from("/a")),
            entries: BTreeMap::from([(PathBuf::from("/a/f"), 1)]),
        };
        assert_eq!(
            serde_json::to_value(&holder).unwrap(),
            json!({ "root": "/a", "entries": [["/a/f", 1]] })
        );
    }

    #[test]
    fn non_utf8_paths_survive() {
        let holder = Holder {
            root: Some(non_utf8()),
            entries: BTreeMap::from([(non_utf8(), 7), (PathBuf::from("/a/ok"), 8)]),
        };

        let json = serde_json::to_string(&holder).unwrap();
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn missing_root_is_null() {
        let holder = Holder {
            root: None,
            entries: BTreeMap::new(),
        };
        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"root":null,"entries":[]}"#);
        assert_eq!(serde_json::from_str::<Holder>(&json).unwrap(), holder);
    }

    #[test]
    fn sets_and_pairs_encode_bytes() {
        #[derive(Serialize)]
        struct Sets {
            #[serde(serialize_with = "super::set::serialize")]
            paths: BTreeSet<PathBuf>,
            #[serde(serialize_with = "super::pairs::serialize")]
            moved: BTreeSet<(PathBuf, PathBuf)>,
        }

        let sets = Sets {
            paths: BTreeSet::from([PathBuf::from(OsStr::from_bytes(b"\xfe"))]),
            moved: BTreeSet::from([(PathBuf::from("x"), PathBuf::from(OsStr::from_bytes(b"\xff")))]),
        };
        assert_eq!(
            serde_json::to_value(&sets).unwrap(),
            json!({ "paths": [[254]], "moved": [["x", [255]]] })
        );
    }
}
