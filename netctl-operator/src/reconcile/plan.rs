//! Pure convergence decisions for one `IPAllocation`, separated from I/O so
//! they stay unit-testable without a cluster. Every function here takes
//! already-fetched facts and returns a decision; nothing in this module
//! touches the network.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFact {
    pub name: String,
    pub schedulable: bool,
    pub ready: bool,
    pub has_ip_ready_label: bool,
    pub drained: bool,
    pub workload_pods_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpAction {
    /// The IP is correctly attached to `node`; set `ip.ready` if missing.
    EnsureLabel { node: String },
    /// `from` must release the IP; `reattach_to`, if any, is where to move it.
    Detach {
        from: String,
        reattach_to: Option<String>,
    },
    /// No holder exists; attach to `node`.
    Attach { node: String },
    /// No holder and no schedulable free node in the pool.
    NoFreeNode,
}

/// Step 3 of the convergence algorithm for a single reserved IP. `holder` is
/// the first node (in pool scan order) for which `CloudBinding::has_ip`
/// returned true; `free_schedulable` is the first not-yet-assigned
/// schedulable node in pool order; `reattach_candidate` is the first ready,
/// schedulable, selector-matching node excluding `holder`.
pub fn decide_ip_action(
    holder: Option<&NodeFact>,
    free_schedulable: Option<&NodeFact>,
    reattach_candidate: Option<&str>,
) -> IpAction {
    match holder {
        Some(h) => {
            let cordoned = !h.schedulable;
            let should_detach = h.drained || (cordoned && !h.workload_pods_present);
            if should_detach {
                IpAction::Detach {
                    from: h.name.clone(),
                    reattach_to: reattach_candidate.map(str::to_string),
                }
            } else {
                IpAction::EnsureLabel { node: h.name.clone() }
            }
        }
        None => match free_schedulable {
            Some(n) => IpAction::Attach {
                node: n.name.clone(),
            },
            None => IpAction::NoFreeNode,
        },
    }
}

/// First node in `nodes` (pool scan order) reported as holding `ip` by the
/// precomputed `has_ip` map, implementing step 3.a's "first scan-order
/// holder wins" rule.
pub fn find_holder<'a>(nodes: &'a [NodeFact], has_ip: &dyn Fn(&str) -> bool) -> Option<&'a NodeFact> {
    nodes.iter().find(|n| has_ip(n.name.as_str()))
}

/// First schedulable node in `free` (insertion order == pool scan order),
/// i.e. ties between equally free nodes are broken by scan order.
pub fn first_free_schedulable<'a>(
    nodes: &'a [NodeFact],
    free: &HashSet<String>,
) -> Option<&'a NodeFact> {
    nodes
        .iter()
        .find(|n| n.schedulable && free.contains(&n.name))
}

/// Step 5: a node's `ip.ready=true` label is stale when it holds none of the
/// resource's reserved IPs.
pub fn needs_label_cleanup(has_label: bool, has_any_reserved_ip: bool) -> bool {
    has_label && !has_any_reserved_ip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(name: &str, schedulable: bool, drained: bool, workload_pods: bool) -> NodeFact {
        NodeFact {
            name: name.to_string(),
            schedulable,
            ready: true,
            has_ip_ready_label: false,
            drained,
            workload_pods_present: workload_pods,
        }
    }

    #[test]
    fn attaches_to_first_free_schedulable_node_when_no_holder() {
        let free = HashSet::from(["b".to_string(), "c".to_string()]);
        let nodes = vec![fact("a", true, false, false), fact("b", true, false, false), fact("c", true, false, false)];
        let target = first_free_schedulable(&nodes, &free);
        assert_eq!(target.unwrap().name, "b");
        assert_eq!(decide_ip_action(None, target, None), IpAction::Attach { node: "b".to_string() });
    }

    #[test]
    fn no_free_schedulable_node_reports_no_free_node() {
        let free = HashSet::new();
        let nodes = vec![fact("a", true, false, false)];
        let target = first_free_schedulable(&nodes, &free);
        assert_eq!(decide_ip_action(None, target, None), IpAction::NoFreeNode);
    }

    #[test]
    fn attached_and_healthy_holder_just_gets_label_ensured() {
        let holder = fact("a", true, false, false);
        assert_eq!(
            decide_ip_action(Some(&holder), None, None),
            IpAction::EnsureLabel { node: "a".to_string() }
        );
    }

    #[test]
    fn drained_holder_is_detached_and_reattached() {
        let holder = fact("a", false, true, false);
        assert_eq!(
            decide_ip_action(Some(&holder), None, Some("b")),
            IpAction::Detach {
                from: "a".to_string(),
                reattach_to: Some("b".to_string())
            }
        );
    }

    #[test]
    fn cordoned_holder_with_workload_pods_keeps_ip() {
        let holder = fact("a", false, false, true);
        assert_eq!(
            decide_ip_action(Some(&holder), None, Some("b")),
            IpAction::EnsureLabel { node: "a".to_string() }
        );
    }

    #[test]
    fn cordoned_holder_without_workload_pods_is_detached() {
        let holder = fact("a", false, false, false);
        assert_eq!(
            decide_ip_action(Some(&holder), None, Some("b")),
            IpAction::Detach {
                from: "a".to_string(),
                reattach_to: Some("b".to_string())
            }
        );
    }

    #[test]
    fn detach_without_replacement_candidate_has_no_reattach() {
        let holder = fact("a", false, true, false);
        assert_eq!(
            decide_ip_action(Some(&holder), None, None),
            IpAction::Detach {
                from: "a".to_string(),
                reattach_to: None
            }
        );
    }

    #[test]
    fn find_holder_returns_first_scan_order_match() {
        let nodes = vec![fact("a", true, false, false), fact("b", true, false, false)];
        let holder = find_holder(&nodes, &|name| name == "b" || name == "a");
        assert_eq!(holder.unwrap().name, "a");
    }

    #[test]
    fn label_cleanup_triggers_only_when_labeled_but_ip_absent() {
        assert!(needs_label_cleanup(true, false));
        assert!(!needs_label_cleanup(true, true));
        assert!(!needs_label_cleanup(false, false));
    }
}
