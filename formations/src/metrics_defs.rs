use shared::metrics_defs::{MetricDef, MetricType};

pub const NOTIFICATIONS_SENT: MetricDef = MetricDef {
    name: "notifications.sent",
    metric_type: MetricType::Counter,
    description: "Webhook notifications dispatched. Tagged with webhook_type, outcome.",
};

pub const NOTIFICATION_DURATION: MetricDef = MetricDef {
    name: "notifications.duration",
    metric_type: MetricType::Histogram,
    description: "Webhook notification round trip in seconds. Tagged with webhook_type, outcome.",
};

pub const ASSIGNMENTS_RESYNCHRONIZED: MetricDef = MetricDef {
    name: "assignments.resynchronized",
    metric_type: MetricType::Counter,
    description: "Formation assignments processed by resynchronization. Tagged with direction, pending.",
};

pub const FORMATION_STATE_TRANSITIONS: MetricDef = MetricDef {
    name: "formations.state_transitions",
    metric_type: MetricType::Counter,
    description: "Formation state changes persisted through the status service. Tagged with state.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    NOTIFICATIONS_SENT,
    NOTIFICATION_DURATION,
    ASSIGNMENTS_RESYNCHRONIZED,
    FORMATION_STATE_TRANSITIONS,
];
