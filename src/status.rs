//! [MODULE F] Status Publisher (spec.md §4.F, §7 "User-visible conditions").
//!
//! Pure condition-transition helpers over `IngressStatus`; the reconciler
//! calls these and then issues one status subresource patch. Grounded on
//! the teacher's direct-field status mutation style, generalized from the
//! teacher's bare `Action::requeue` outcome to Knative's three named
//! conditions.

use crate::crd::{condition_types, ConditionStatus, IngressCondition, IngressStatus, LoadBalancerIngress};

fn set_condition(status: &mut IngressStatus, type_: &str, condition_status: ConditionStatus, reason: Option<&str>, message: Option<&str>) {
    if let Some(existing) = status.conditions.iter_mut().find(|c| c.type_ == type_) {
        existing.status = condition_status;
        existing.reason = reason.map(String::from);
        existing.message = message.map(String::from);
        return;
    }
    status.conditions.push(IngressCondition {
        type_: type_.to_string(),
        status: condition_status,
        reason: reason.map(String::from),
        message: message.map(String::from),
    });
}

fn recompute_ready(status: &mut IngressStatus) {
    let network_ok = matches!(condition(status, condition_types::NETWORK_CONFIGURED), Some(ConditionStatus::True));
    let lb_ok = matches!(condition(status, condition_types::LOAD_BALANCER_READY), Some(ConditionStatus::True));
    let ready = if network_ok && lb_ok {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    set_condition(status, condition_types::READY, ready, None, None);
}

fn condition(status: &IngressStatus, type_: &str) -> Option<ConditionStatus> {
    status
        .conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status.clone())
}

/// First successful route write for this pass (spec.md §4.F).
pub fn mark_network_configured(status: &mut IngressStatus) {
    set_condition(status, condition_types::NETWORK_CONFIGURED, ConditionStatus::True, None, None);
    recompute_ready(status);
}

/// A child route is not yet accepted by any parent.
pub fn mark_http_route_not_ready(status: &mut IngressStatus, message: &str) {
    set_condition(
        status,
        condition_types::NETWORK_CONFIGURED,
        ConditionStatus::False,
        Some("HTTPRouteNotReady"),
        Some(message),
    );
    recompute_ready(status);
}

/// Reconcile failed outright this pass.
pub fn mark_reconcile_failed(status: &mut IngressStatus, message: &str) {
    set_condition(
        status,
        condition_types::NETWORK_CONFIGURED,
        ConditionStatus::False,
        Some("ReconcileIngressFailed"),
        Some(message),
    );
    recompute_ready(status);
}

/// A required gateway does not exist (spec.md §7, S4).
pub fn mark_load_balancer_failed(status: &mut IngressStatus, message: &str) {
    set_condition(
        status,
        condition_types::LOAD_BALANCER_READY,
        ConditionStatus::False,
        Some("GatewayDoesNotExist"),
        Some(message),
    );
    recompute_ready(status);
}

/// All routes probe-ready; publish the resolved addresses.
pub fn mark_load_balancer_ready(status: &mut IngressStatus, public: Vec<LoadBalancerIngress>, private: Vec<LoadBalancerIngress>) {
    status.public_load_balancer = public;
    status.private_load_balancer = private;
    set_condition(status, condition_types::LOAD_BALANCER_READY, ConditionStatus::True, None, None);
    recompute_ready(status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_requires_both_network_and_lb() {
        let mut status = IngressStatus::default();
        mark_network_configured(&mut status);
        assert_eq!(condition(&status, condition_types::READY), Some(ConditionStatus::False));
        mark_load_balancer_ready(&mut status, vec![], vec![]);
        assert_eq!(condition(&status, condition_types::READY), Some(ConditionStatus::True));
    }

    #[test]
    fn route_not_ready_flips_ready_back_to_false() {
        let mut status = IngressStatus::default();
        mark_network_configured(&mut status);
        mark_load_balancer_ready(&mut status, vec![], vec![]);
        mark_http_route_not_ready(&mut status, "route pending");
        assert_eq!(condition(&status, condition_types::READY), Some(ConditionStatus::False));
    }

    #[test]
    fn gateway_missing_sets_failed_reason() {
        let mut status = IngressStatus::default();
        mark_load_balancer_failed(&mut status, "gateway istio-system/istio-gateway not found");
        let lb = status
            .conditions
            .iter()
            .find(|c| c.type_ == condition_types::LOAD_BALANCER_READY)
            .unwrap();
        assert_eq!(lb.reason.as_deref(), Some("GatewayDoesNotExist"));
    }
}
