//! Environment-namespaced topic and group names.
//!
//! These are the only functions that build topic and group strings, so
//! producers and consumers of one environment always agree.

use crate::environment::Environment;

/// `{env}_{topic}`
pub fn namespaced_topic(env: &Environment, topic: &str) -> String {
    format!("{}_{}", env.name(), topic)
}

/// `{env}_{producer_id}`, suffixed with `_{host}` outside production when
/// local-consume-only is on.
pub fn namespaced_group(env: &Environment, producer_id: &str) -> String {
    if !env.is_production_env() && env.is_local_consume_only() {
        format!("{}_{}_{}", env.name(), producer_id, env.host_identifier())
    } else {
        format!("{}_{}", env.name(), producer_id)
    }
}
