use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Service type the dashboard uses for TCP latency probes.
pub const TCPING_TYPE: u8 = 3;
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_DURATION: u64 = 30;

/// Body of `POST /api/v1/service`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub cover: u8,
    pub duration: u64,
    pub enable_trigger_task: bool,
    pub enable_show_in_service: bool,
    pub fail_trigger_tasks: Vec<u64>,
    pub fail_trigger_tasks_raw: String,
    pub max_latency: u64,
    pub min_latency: u64,
    pub name: String,
    pub notification_group_id: u64,
    pub recover_trigger_tasks: Vec<u64>,
    pub recover_trigger_tasks_raw: String,
    pub skip_servers: Map<String, Value>,
    pub target: String,
    #[serde(rename = "type")]
    pub task_type: u8,
}

/// Fields a caller may set on top of the default template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadOverrides {
    pub cover: Option<u8>,
    pub duration: Option<u64>,
    pub enable_trigger_task: Option<bool>,
    pub enable_show_in_service: Option<bool>,
    pub fail_trigger_tasks: Option<Vec<u64>>,
    pub max_latency: Option<u64>,
    pub min_latency: Option<u64>,
    pub notification_group_id: Option<u64>,
    pub recover_trigger_tasks: Option<Vec<u64>>,
    pub skip_servers: Option<Map<String, Value>>,
    /// Full `host:port`; replaces the `{address}:80` default verbatim.
    pub target: Option<String>,
    pub task_type: Option<u8>,
}

impl TaskPayload {
    pub fn template(name: &str, address: &str) -> Self {
        Self {
            cover: 0,
            duration: DEFAULT_DURATION,
            enable_trigger_task: true,
            enable_show_in_service: false,
            fail_trigger_tasks: Vec::new(),
            fail_trigger_tasks_raw: String::new(),
            max_latency: 0,
            min_latency: 0,
            name: name.to_string(),
            notification_group_id: 0,
            recover_trigger_tasks: Vec::new(),
            recover_trigger_tasks_raw: String::new(),
            skip_servers: Map::new(),
            target: format!("{}:{}", address, DEFAULT_PORT),
            task_type: TCPING_TYPE,
        }
    }
}

/// Overlays `overrides` onto the default template. Values are not range-checked.
pub fn build_payload(name: &str, address: &str, overrides: &PayloadOverrides) -> TaskPayload {
    let mut payload = TaskPayload::template(name, address);
    let o = overrides.clone();

    if let Some(v) = o.cover { payload.cover = v; }
    if let Some(v) = o.duration { payload.duration = v; }
    if let Some(v) = o.enable_trigger_task { payload.enable_trigger_task = v; }
    if let Some(v) = o.enable_show_in_service { payload.enable_show_in_service = v; }
    if let Some(v) = o.fail_trigger_tasks {
        payload.fail_trigger_tasks_raw = raw_id_list(&v);
        payload.fail_trigger_tasks = v;
    }
    if let Some(v) = o.max_latency { payload.max_latency = v; }
    if let Some(v) = o.min_latency { payload.min_latency = v; }
    if let Some(v) = o.notification_group_id { payload.notification_group_id = v; }
    if let Some(v) = o.recover_trigger_tasks {
        payload.recover_trigger_tasks_raw = raw_id_list(&v);
        payload.recover_trigger_tasks = v;
    }
    if let Some(v) = o.skip_servers { payload.skip_servers = v; }
    if let Some(v) = o.target { payload.target = v; }
    if let Some(v) = o.task_type { payload.task_type = v; }

    payload
}

// The dashboard form keeps a JSON-array string next to each id list.
fn raw_id_list(ids: &[u64]) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("[{}]", joined.join(","))
}
