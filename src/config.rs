use std::{fs, path::Path};

use serde_json::{Map, Value};

use crate::{NetErr, Result, network::Activation};

/// A network or optimizer configuration document.
///
/// A JSON object carrying an `otype` tag plus keys specific to that type. Every getter reports
/// the key it failed on.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    doc: Map<String, Value>,
}

impl NetworkConfig {
    /// Wraps a parsed JSON document.
    ///
    /// # Returns
    /// A new `NetworkConfig` or a configuration error if `value` is not an object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(doc) = value else {
            return Err(NetErr::config("<root>", "the configuration must be a JSON object"));
        };

        Ok(Self { doc: doc.clone() })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| NetErr::config("<root>", format!("malformed JSON: {e}")))?;
        Self::from_value(&value)
    }

    /// Reads and parses the document at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Self::from_json_str(&s)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.doc
    }

    /// Returns the type tag.
    pub fn otype(&self) -> Result<&str> {
        match self.doc.get("otype") {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(NetErr::config("otype", "expected a string")),
            None => Err(NetErr::config("otype", "missing type tag")),
        }
    }

    pub fn required_usize(&self, key: &str) -> Result<usize> {
        let value = self
            .doc
            .get(key)
            .ok_or_else(|| NetErr::config(key, "missing required key"))?;

        as_usize(key, value)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        self.doc
            .get(key)
            .map_or(Ok(default), |value| as_usize(key, value))
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64> {
        match self.doc.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .ok_or_else(|| NetErr::config(key, "expected a non-negative integer")),
        }
    }

    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32> {
        match self.doc.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .map(|v| v as f32)
                .filter(|v| v.is_finite())
                .ok_or_else(|| NetErr::config(key, "expected a finite number")),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        match self.doc.get(key) {
            None => Ok(default),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(NetErr::config(key, "expected a string")),
        }
    }

    pub fn activation_or(&self, key: &str, default: Activation) -> Result<Activation> {
        let name = self.str_or(key, default.name())?;
        Activation::from_name(name)
            .ok_or_else(|| NetErr::config(key, format!("unknown activation `{name}`")))
    }
}

fn as_usize(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| NetErr::config(key, "expected a non-negative integer"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn getters_and_defaults() {
        let config = NetworkConfig::from_value(&json!({
            "otype": "CutlassMLP",
            "n_input_dims": 3,
            "activation": "tanh",
        }))
        .unwrap();

        assert_eq!(config.otype().unwrap(), "CutlassMLP");
        assert_eq!(config.required_usize("n_input_dims").unwrap(), 3);
        assert_eq!(config.usize_or("n_neurons", 64).unwrap(), 64);
        assert_eq!(config.u64_or("seed", 1337).unwrap(), 1337);
        assert_eq!(config.f32_or("learning_rate", 1e-3).unwrap(), 1e-3);
        assert_eq!(
            config.activation_or("activation", Activation::ReLU).unwrap(),
            Activation::Tanh
        );
        assert_eq!(
            config
                .activation_or("output_activation", Activation::None)
                .unwrap(),
            Activation::None
        );
    }

    #[test]
    fn errors_name_the_key() {
        let config = NetworkConfig::from_value(&json!({
            "n_input_dims": -1,
            "activation": "swish",
        }))
        .unwrap();

        let key_of = |e: NetErr| match e {
            NetErr::Config { key, .. } => key,
            other => panic!("unexpected error {other}"),
        };

        assert_eq!(key_of(config.otype().unwrap_err()), "otype");
        assert_eq!(key_of(config.required_usize("n_input_dims").unwrap_err()), "n_input_dims");
        assert_eq!(key_of(config.required_usize("n_output_dims").unwrap_err()), "n_output_dims");
        assert_eq!(
            key_of(config.activation_or("activation", Activation::None).unwrap_err()),
            "activation"
        );
    }

    #[test]
    fn rejects_non_objects() {
        assert!(NetworkConfig::from_value(&json!([1, 2])).is_err());
        assert!(NetworkConfig::from_json_str("{ nope").is_err());
    }
}
