//! The scheduler app-definition document and the handful of typed accessors the cutover core
//! needs over it.
//!
//! Marathon app definitions carry many fields this tool never looks at (`cpus`, `mem`, `env`,
//! `upgradeStrategy`, ...). Rather than modeling the whole schema, [`AppDef`] wraps the raw JSON
//! object and exposes accessors for exactly the fields the core reads or writes; every other key
//! rides along untouched on serialization, the same way the original script's plain `dict` did.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const LABEL_GROUP: &str = "HAPROXY_DEPLOYMENT_GROUP";
pub const LABEL_ALT_PORT: &str = "HAPROXY_DEPLOYMENT_ALT_PORT";
pub const LABEL_COLOUR: &str = "HAPROXY_DEPLOYMENT_COLOUR";
pub const LABEL_STARTED_AT: &str = "HAPROXY_DEPLOYMENT_STARTED_AT";
pub const LABEL_TARGET_INSTANCES: &str = "HAPROXY_DEPLOYMENT_TARGET_INSTANCES";
pub const LABEL_0_PORT: &str = "HAPROXY_0_PORT";
pub const LABEL_APP_ID: &str = "HAPROXY_APP_ID";

/// Blue/green colour tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
    Blue,
    Green,
}

impl Colour {
    pub fn opposite(self) -> Colour {
        match self {
            Colour::Blue => Colour::Green,
            Colour::Green => Colour::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Colour::Blue => "blue",
            Colour::Green => "green",
        }
    }
}

impl std::fmt::Display for Colour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Colour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blue" => Ok(Colour::Blue),
            "green" => Ok(Colour::Green),
            other => Err(format!("unrecognized colour label: {other}")),
        }
    }
}

/// A scheduler task: one running instance of an app.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Task {
    pub id: String,
    pub host: String,
    pub ports: Vec<u16>,
}

/// A scheduler app definition, JSON document plus typed accessors.
#[derive(Debug, Clone)]
pub struct AppDef {
    raw: Map<String, Value>,
}

impl AppDef {
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(raw) => Ok(Self { raw }),
            _ => Err("app definition must be a JSON object".to_string()),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.raw)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.raw.clone())
    }

    pub fn id(&self) -> Option<&str> {
        self.raw.get("id").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.raw.insert("id".to_string(), Value::String(id.into()));
    }

    pub fn instances(&self) -> Option<i64> {
        self.raw.get("instances").and_then(Value::as_i64)
    }

    pub fn set_instances(&mut self, instances: i64) {
        self.raw
            .insert("instances".to_string(), Value::from(instances));
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.raw
            .get("labels")
            .and_then(Value::as_object)
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<String> {
        self.labels().get(key).cloned()
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let labels = self
            .raw
            .entry("labels".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(labels) = labels {
            labels.insert(key.into(), Value::String(value.into()));
        }
    }

    /// Tasks attached to a scheduler-reported app (absent on the operator-supplied input doc).
    pub fn tasks(&self) -> Vec<Task> {
        self.raw
            .get("tasks")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Reads `ports[0]` or `container.docker.portMappings[0].servicePort`, whichever is present.
    pub fn get_service_port(&self) -> Option<u16> {
        if let Some(port) = self.docker_service_port() {
            return Some(port);
        }
        self.raw
            .get("ports")
            .and_then(Value::as_array)
            .and_then(|ports| ports.first())
            .and_then(Value::as_u64)
            .map(|p| p as u16)
    }

    /// Writes the service port back to whichever location the document uses. Both branches use
    /// the passed-in `port` value: the original script's non-Docker branch referenced an
    /// undefined `servicePort` name there instead, a latent bug this port does not reproduce.
    pub fn set_service_port(&mut self, port: u16) {
        if self.docker_service_port().is_some() {
            if let Some(mapping) = self.docker_port_mapping_mut() {
                mapping.insert("servicePort".to_string(), Value::from(port));
            }
            return;
        }
        let ports = self
            .raw
            .entry("ports".to_string())
            .or_insert_with(|| Value::Array(vec![Value::from(0)]));
        if let Value::Array(ports) = ports {
            if ports.is_empty() {
                ports.push(Value::from(port));
            } else {
                ports[0] = Value::from(port);
            }
        }
    }

    fn docker_service_port(&self) -> Option<u16> {
        self.docker_port_mapping()
            .and_then(|m| m.get("servicePort"))
            .and_then(Value::as_u64)
            .map(|p| p as u16)
    }

    fn docker_port_mapping(&self) -> Option<&Map<String, Value>> {
        self.raw
            .get("container")?
            .get("docker")?
            .get("portMappings")?
            .as_array()?
            .first()?
            .as_object()
    }

    fn docker_port_mapping_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.raw
            .get_mut("container")?
            .get_mut("docker")?
            .get_mut("portMappings")?
            .as_array_mut()?
            .first_mut()?
            .as_object_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_plain_ports_service_port() {
        let app = AppDef::from_value(json!({"id": "/svc", "ports": [80]})).unwrap();
        assert_eq!(app.get_service_port(), Some(80));
    }

    #[test]
    fn reads_docker_port_mapping_service_port() {
        let app = AppDef::from_value(json!({
            "id": "/svc",
            "container": {"docker": {"portMappings": [{"servicePort": 8080}]}}
        }))
        .unwrap();
        assert_eq!(app.get_service_port(), Some(8080));
    }

    #[test]
    fn set_service_port_writes_plain_ports() {
        let mut app = AppDef::from_value(json!({"id": "/svc", "ports": [80]})).unwrap();
        app.set_service_port(10001);
        assert_eq!(app.get_service_port(), Some(10001));
    }

    #[test]
    fn set_service_port_writes_docker_mapping_using_the_passed_in_port() {
        let mut app = AppDef::from_value(json!({
            "id": "/svc",
            "container": {"docker": {"portMappings": [{"servicePort": 8080}]}}
        }))
        .unwrap();
        app.set_service_port(10001);
        assert_eq!(app.get_service_port(), Some(10001));
    }

    #[test]
    fn labels_round_trip() {
        let mut app = AppDef::from_value(json!({"id": "/svc"})).unwrap();
        app.set_label(LABEL_GROUP, "svc");
        app.set_label(LABEL_COLOUR, "blue");
        let labels = app.labels();
        assert_eq!(labels.get(LABEL_GROUP).map(String::as_str), Some("svc"));
        assert_eq!(labels.get(LABEL_COLOUR).map(String::as_str), Some("blue"));
    }

    #[test]
    fn tasks_parse_from_scheduler_response() {
        let app = AppDef::from_value(json!({
            "id": "/svc",
            "tasks": [{"id": "task1", "host": "10.0.0.1", "ports": [31001]}]
        }))
        .unwrap();
        let tasks = app.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].host, "10.0.0.1");
        assert_eq!(tasks[0].ports, vec![31001]);
    }

    #[test]
    fn colour_opposite_and_parse() {
        assert_eq!(Colour::Blue.opposite(), Colour::Green);
        assert_eq!(Colour::Green.opposite(), Colour::Blue);
        assert_eq!("blue".parse::<Colour>().unwrap(), Colour::Blue);
        assert!("purple".parse::<Colour>().is_err());
    }
}
