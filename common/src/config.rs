use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use hocon::{Hocon, HoconLoader};

/// Loads settings from a hocon file with a scoped section, letting
/// environment variables override any key.
#[derive(Debug)]
pub struct ConfigLoader {
    hocon: Hocon,
    env: HashMap<String, String>,
    scope: String,
}

impl ConfigLoader {
    pub fn new(path: impl AsRef<Path>, scope: String) -> Result<Self> {
        let path = path.as_ref();
        assert!(path.is_file(), "The config file was {:?} not found", path);

        let env = std::env::vars().collect::<HashMap<_, _>>();

        let hocon = HoconLoader::new()
            .load_file(path)
            .with_context(|| format!("Failed to find or load config file at: {:?}", path))?
            .hocon()?;

        Ok(Self { hocon, env, scope })
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.env.get(name) {
            return Some(Value::String(value.clone()));
        }

        let scope = &self.hocon[self.scope.as_str()];
        if matches!(scope, Hocon::Hash(_)) {
            if let Some(value) = Self::map_hocon(scope, name) {
                return Some(value);
            }
        }

        Self::map_hocon(&self.hocon, name)
    }

    pub fn load<T: Config>(&self) -> Result<T> {
        let res = T::load(self)?;
        Ok(res)
    }

    fn map_hocon(hocon: &Hocon, name: &str) -> Option<Value> {
        match &hocon[name] {
            Hocon::Real(val) => Some(Value::Float(*val as f32)),
            Hocon::Integer(val) => Some(Value::Integer(*val as usize)),
            Hocon::String(string) => Some(Value::String(string.clone())),
            Hocon::Boolean(val) => Some(Value::Boolean(*val)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum Value {
    String(String),
    Integer(usize),
    Float(f32),
    Boolean(bool),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(val) => Some(*val),
            Value::String(val) => Hocon::String(val.clone()).as_bool(),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            Value::Integer(val) => Some(*val),
            Value::String(val) => val.parse::<usize>().ok(),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(val) => Some(*val),
            Value::Integer(val) => Some(*val as f32),
            Value::String(val) => val.parse::<f32>().ok(),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::String(val) => Some(val.clone()),
            Value::Boolean(true) => Some("true".to_string()),
            Value::Boolean(false) => Some("false".to_string()),
            Value::Float(val) => Some(val.to_string()),
            Value::Integer(val) => Some(val.to_string()),
        }
    }
}

pub trait Config {
    fn load(config: &ConfigLoader) -> Result<Self>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("pulsar_config_{}.conf", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_scoped_lookup_falls_back_to_root() {
        let path = write_config(
            "api_base_url = \"http://localhost:40000\"\nboost { num_rollouts = 4 }\n",
        );
        let config = ConfigLoader::new(&path, "boost".to_string()).unwrap();

        assert_eq!(config.get("num_rollouts").unwrap().as_usize(), Some(4));
        assert_eq!(
            config.get("api_base_url").unwrap().as_string(),
            Some("http://localhost:40000".to_string())
        );

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_env_overrides_file() {
        let path = write_config("boost { pulsar_test_depth = 2 }\n");
        std::env::set_var("pulsar_test_depth", "7");
        let config = ConfigLoader::new(&path, "boost".to_string()).unwrap();

        assert_eq!(config.get("pulsar_test_depth").unwrap().as_usize(), Some(7));

        std::env::remove_var("pulsar_test_depth");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::String("1.5".to_string()).as_f32(), Some(1.5));
        assert_eq!(Value::Integer(3).as_f32(), Some(3.0));
        assert_eq!(Value::String("true".to_string()).as_bool(), Some(true));
        assert_eq!(Value::Float(1.414).as_usize(), None);
    }
}
