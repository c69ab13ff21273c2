use log::kv::{self, Key, Value, VisitSource};
use log::Record;
use serde_json::{json, Map};
use std::io::Write;

use crate::config::LogLevel;

/// Installs the process logger: one JSON object per line on stdout.
pub fn init(level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(level.into())
        .target(env_logger::Target::Stdout)
        .format(|buf, record| writeln!(buf, "{}", render(record)))
        .init();
}

fn render(record: &Record) -> serde_json::Value {
    let mut event = Map::new();
    event.insert("time".into(), json!(chrono::Utc::now().to_rfc3339()));
    event.insert("level".into(), json!(record.level().as_str()));
    event.insert("target".into(), json!(record.target()));
    event.insert("msg".into(), json!(record.args().to_string()));

    let mut fields = Fields(&mut event);
    // Visiting an in-memory map cannot fail.
    let _ = record.key_values().visit(&mut fields);
    serde_json::Value::Object(event)
}

struct Fields<'a>(&'a mut Map<String, serde_json::Value>);

impl<'kvs> VisitSource<'kvs> for Fields<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
        self.0.insert(key.as_str().to_string(), json!(value.to_string()));
        Ok(())
    }
}
