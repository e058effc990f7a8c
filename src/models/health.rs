use chrono::{DateTime, Utc};

#[derive(Clone, Debug)]
pub struct Health {
    pub ok: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
pub struct HealthV1 {
    pub ok: bool,
    pub started_at: DateTime<Utc>,
}

json_responder!(HealthV1);

impl From<Health> for HealthV1 {
    fn from(state: Health) -> Self {
        Self {
            ok: state.ok,
            started_at: state.started_at,
        }
    }
}
