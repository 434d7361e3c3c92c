//! Typed per-entity state store (`user_data`) shared between script frames.

use glam::Vec3;
use rhai::{Array, Dynamic, Map, FLOAT, INT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UserValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Vec3([f32; 3]),
    List(Vec<UserValue>),
    Map(BTreeMap<String, UserValue>),
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("user_data cannot store values of type '{type_name}'")]
pub struct UnsupportedValue {
    pub type_name: String,
}

impl UserValue {
    pub fn from_dynamic(value: &Dynamic) -> Result<Self, UnsupportedValue> {
        let value = value.flatten_clone();
        if value.is_unit() {
            return Ok(UserValue::Unit);
        }
        if let Ok(flag) = value.as_bool() {
            return Ok(UserValue::Bool(flag));
        }
        if let Ok(int) = value.as_int() {
            return Ok(UserValue::Int(int));
        }
        if let Ok(float) = value.as_float() {
            return Ok(UserValue::Float(float));
        }
        if let Ok(ch) = value.as_char() {
            return Ok(UserValue::Char(ch));
        }
        if value.is_string() {
            let text = value.into_string().map_err(|type_name| UnsupportedValue { type_name: type_name.to_string() })?;
            return Ok(UserValue::Str(text));
        }
        if value.is::<Vec3>() {
            let v = value.cast::<Vec3>();
            return Ok(UserValue::Vec3(v.to_array()));
        }
        if value.is_array() {
            let array = value.into_array().map_err(|type_name| UnsupportedValue { type_name: type_name.to_string() })?;
            let items = array.iter().map(UserValue::from_dynamic).collect::<Result<Vec<_>, _>>()?;
            return Ok(UserValue::List(items));
        }
        if value.is_map() {
            let type_name = value.type_name().to_string();
            let map = value.try_cast::<Map>().ok_or(UnsupportedValue { type_name })?;
            let mut out = BTreeMap::new();
            for (key, item) in map.iter() {
                out.insert(key.to_string(), UserValue::from_dynamic(item)?);
            }
            return Ok(UserValue::Map(out));
        }
        Err(UnsupportedValue { type_name: value.type_name().to_string() })
    }

    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            UserValue::Unit => Dynamic::UNIT,
            UserValue::Bool(flag) => Dynamic::from_bool(*flag),
            UserValue::Int(int) => Dynamic::from_int(*int as INT),
            UserValue::Float(float) => Dynamic::from_float(*float as FLOAT),
            UserValue::Char(ch) => Dynamic::from_char(*ch),
            UserValue::Str(text) => Dynamic::from(text.clone()),
            UserValue::Vec3(v) => Dynamic::from(Vec3::from_array(*v)),
            UserValue::List(items) => {
                let array: Array = items.iter().map(UserValue::to_dynamic).collect();
                Dynamic::from_array(array)
            }
            UserValue::Map(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    map.insert(key.as_str().into(), item.to_dynamic());
                }
                Dynamic::from_map(map)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UserValue::Unit => "unit",
            UserValue::Bool(_) => "bool",
            UserValue::Int(_) => "int",
            UserValue::Float(_) => "float",
            UserValue::Char(_) => "char",
            UserValue::Str(_) => "string",
            UserValue::Vec3(_) => "vec3",
            UserValue::List(_) => "list",
            UserValue::Map(_) => "map",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            UserValue::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            UserValue::Float(float) => Some(*float),
            UserValue::Int(int) => Some(*int as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            UserValue::Str(text) => Some(text),
            _ => None,
        }
    }
}

impl From<i64> for UserValue {
    fn from(value: i64) -> Self {
        UserValue::Int(value)
    }
}

impl From<f64> for UserValue {
    fn from(value: f64) -> Self {
        UserValue::Float(value)
    }
}

impl From<bool> for UserValue {
    fn from(value: bool) -> Self {
        UserValue::Bool(value)
    }
}

impl From<&str> for UserValue {
    fn from(value: &str) -> Self {
        UserValue::Str(value.to_string())
    }
}

/// String-keyed script state. Only dropped together with its owner; the frame driver never clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserData {
    entries: BTreeMap<String, UserValue>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&UserValue> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: UserValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<UserValue> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UserValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_convert_both_ways() {
        for value in [UserValue::Int(3), UserValue::Float(1.5), UserValue::Bool(true), UserValue::Char('x'), UserValue::from("hi")] {
            let dynamic = value.to_dynamic();
            assert_eq!(UserValue::from_dynamic(&dynamic).expect("convert back"), value);
        }
    }

    #[test]
    fn nested_collections_keep_structure() {
        let mut map = Map::new();
        map.insert("hits".into(), Dynamic::from_int(2));
        map.insert("offset".into(), Dynamic::from(Vec3::new(1.0, 2.0, 3.0)));
        let array: Array = vec![Dynamic::from_map(map), Dynamic::UNIT];
        let value = UserValue::from_dynamic(&Dynamic::from_array(array)).expect("convert list");
        let UserValue::List(items) = value else {
            panic!("expected list");
        };
        assert_eq!(items[1], UserValue::Unit);
        let UserValue::Map(entries) = &items[0] else {
            panic!("expected map");
        };
        assert_eq!(entries.get("hits"), Some(&UserValue::Int(2)));
        assert_eq!(entries.get("offset"), Some(&UserValue::Vec3([1.0, 2.0, 3.0])));
    }

    #[test]
    fn opaque_values_are_rejected() {
        #[derive(Clone)]
        struct Opaque;
        let err = UserValue::from_dynamic(&Dynamic::from(Opaque)).unwrap_err();
        assert!(err.to_string().contains("cannot store"), "unexpected message: {err}");
    }

    #[test]
    fn user_data_tracks_keys() {
        let mut data = UserData::new();
        data.set("counter", UserValue::Int(1));
        data.set("label", UserValue::from("door"));
        assert!(data.contains("counter"));
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["counter", "label"]);
        assert_eq!(data.remove("counter"), Some(UserValue::Int(1)));
        assert_eq!(data.len(), 1);
    }
}
