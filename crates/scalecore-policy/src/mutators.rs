//! Policy mutators (§4.5.1): transformations applied to a policy after
//! it is read from a source and before it is handed to a handler.
//! Currently just the Nomad APM short-query expansion; additional
//! mutators are appended to `apply` in the same style.

use scalecore_core::{PolicyTarget, PolicyType, PoolIdentifier, ScalingPolicy, ScalingPolicyCheck};

/// The APM source name that gets short-query expansion.
const NOMAD_APM_SOURCE: &str = "nomad-apm";

/// Nomad's built-in APM only ever aggregates short queries by average.
const SHORT_QUERY_OP: &str = "avg";

/// Applies every registered mutator to `policy` in place.
pub fn apply(policy: &mut ScalingPolicy) {
    let target = policy.target.clone();
    let policy_type = policy.policy_type;
    for check in &mut policy.checks {
        expand_nomad_apm_short_query(check, &target, policy_type);
    }
}

/// Expands a bare Nomad-APM metric name (e.g. `"cpu"`) into the fully
/// qualified query Nomad's built-in APM expects (§4.5.1), using the
/// policy's own target identity:
///
/// - horizontal: `taskgroup_<op>_<metric>/<group>/<job>[@<namespace>]`
/// - cluster: `node_<op>_<metric>/<pool-value>/class`
///
/// A query that already contains a `/` is assumed fully qualified and
/// left alone.
fn expand_nomad_apm_short_query(
    check: &mut ScalingPolicyCheck,
    target: &PolicyTarget,
    policy_type: PolicyType,
) {
    if check.source != NOMAD_APM_SOURCE {
        return;
    }
    if check.query.contains('/') {
        return;
    }
    check.query = match policy_type {
        PolicyType::Horizontal => {
            let job = target.get("Job").unwrap_or_default();
            let group = target.get("Group").unwrap_or_default();
            let mut query = format!("taskgroup_{SHORT_QUERY_OP}_{}/{group}/{job}", check.query);
            if let Some(namespace) = target.get("Namespace").filter(|v| !v.is_empty()) {
                query.push('@');
                query.push_str(namespace);
            }
            query
        }
        PolicyType::Cluster => {
            let pool = PoolIdentifier::from_target_config(&target.config);
            let pool_value = pool.node_class.unwrap_or_default();
            format!("node_{SHORT_QUERY_OP}_{}/{pool_value}/class", check.query)
        }
    };
}
