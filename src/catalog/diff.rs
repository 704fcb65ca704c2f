//! Differential set reconciliation between two catalog snapshots.
//!
//! [`only_in_first`] answers one asymmetric question: which services (and
//! which of their nodes and healths) must be applied to side B so that it
//! matches side A. Keys present only in B are invisible to the caller; the
//! reverse direction is a second call with the arguments swapped.

use std::collections::HashMap;

use crate::catalog::service::{HealthMap, NodeMap, Service, ServiceMap};

/// Nodes of `a` that are missing from `b`.
///
/// Hosts absent from `b` carry all of `a`'s ports; shared hosts carry only
/// the ports `b` does not have. Hosts left with no ports are dropped.
pub fn diff_nodes(a: &NodeMap, b: &NodeMap) -> NodeMap {
    let mut nodes = NodeMap::new();
    for (host, ports_a) in a {
        match b.get(host) {
            None => {
                nodes.insert(host.clone(), ports_a.clone());
            }
            Some(ports_b) => {
                let ports: HashMap<_, _> = ports_a
                    .iter()
                    .filter(|(port, _)| !ports_b.contains_key(*port))
                    .map(|(port, node)| (*port, node.clone()))
                    .collect();
                if !ports.is_empty() {
                    nodes.insert(host.clone(), ports);
                }
            }
        }
    }
    nodes
}

/// Healths of `a` that are missing from `b` or differ in value.
pub fn diff_healths(a: &HealthMap, b: &HealthMap) -> HealthMap {
    a.iter()
        .filter(|(key, health)| b.get(*key) != Some(health))
        .map(|(key, health)| (key.clone(), *health))
        .collect()
}

/// Merge the scalar fields of two records for the same canonical key:
/// `a` wins when non-empty, `b` fills the gaps; provenance flags are OR-ed.
/// Nodes, healths and tags are not carried.
fn merge_meta(a: &Service, b: &Service) -> Service {
    fn pick(a: &str, b: &str) -> String {
        if a.is_empty() { b.to_string() } else { a.to_string() }
    }

    Service {
        id: pick(&a.id, &b.id),
        name: pick(&a.name, &b.name),
        aws_id: pick(&a.aws_id, &b.aws_id),
        consul_id: pick(&a.consul_id, &b.consul_id),
        aws_namespace: pick(&a.aws_namespace, &b.aws_namespace),
        from_consul: a.from_consul || b.from_consul,
        from_aws: a.from_aws || b.from_aws,
        ..Default::default()
    }
}

/// The services that must be applied to side B to make it match side A.
///
/// Keys only in A are emitted verbatim; keys in both are reduced to their
/// node and health deltas (and dropped entirely when both deltas are
/// empty); keys only in B are not included.
pub fn only_in_first(a: &ServiceMap, b: &ServiceMap) -> ServiceMap {
    let mut result = ServiceMap::new();
    for (key, sa) in a {
        let Some(sb) = b.get(key) else {
            result.insert(key.clone(), sa.clone());
            continue;
        };

        let nodes = diff_nodes(&sa.nodes, &sb.nodes);
        let healths = diff_healths(&sa.healths, &sb.healths);
        if nodes.is_empty() && healths.is_empty() {
            continue;
        }

        let mut service = merge_meta(sa, sb);
        service.nodes = nodes;
        service.healths = healths;
        result.insert(key.clone(), service);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::service::{Health, Node};

    // ========================================================================
    // Helpers
    // ========================================================================

    fn nodes(entries: &[(&str, &[u16])]) -> NodeMap {
        entries
            .iter()
            .map(|(host, ports)| {
                let ports = ports
                    .iter()
                    .map(|p| {
                        (
                            *p,
                            Node {
                                port: *p,
                                ..Default::default()
                            },
                        )
                    })
                    .collect();
                (host.to_string(), ports)
            })
            .collect()
    }

    fn healths(entries: &[(&str, Health)]) -> HealthMap {
        entries
            .iter()
            .map(|(key, h)| (key.to_string(), *h))
            .collect()
    }

    fn services(entries: Vec<(&str, Service)>) -> ServiceMap {
        entries
            .into_iter()
            .map(|(key, service)| (key.to_string(), service))
            .collect()
    }

    // ========================================================================
    // only_in_first
    // ========================================================================

    #[test]
    fn test_only_in_first_table() {
        struct Variant {
            a: ServiceMap,
            b: ServiceMap,
            expected: ServiceMap,
        }

        let table = vec![
            // Both empty
            Variant {
                a: ServiceMap::new(),
                b: ServiceMap::new(),
                expected: ServiceMap::new(),
            },
            // Key only in A is emitted verbatim, provenance preserved
            Variant {
                a: services(vec![(
                    "s1",
                    Service {
                        from_consul: true,
                        ..Default::default()
                    },
                )]),
                b: ServiceMap::new(),
                expected: services(vec![(
                    "s1",
                    Service {
                        from_consul: true,
                        ..Default::default()
                    },
                )]),
            },
            // Disjoint hosts: A's host carried, B's host invisible
            Variant {
                a: services(vec![(
                    "s2",
                    Service {
                        from_consul: true,
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s2",
                    Service {
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s2",
                    Service {
                        from_consul: true,
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            // Provenance flags are OR-ed across the two records
            Variant {
                a: services(vec![(
                    "s3",
                    Service {
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s3",
                    Service {
                        from_consul: true,
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s3",
                    Service {
                        from_consul: true,
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            Variant {
                a: services(vec![(
                    "s5",
                    Service {
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s5",
                    Service {
                        from_aws: true,
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s5",
                    Service {
                        from_aws: true,
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            // Identical empty records cancel out
            Variant {
                a: services(vec![("s8", Service::default())]),
                b: services(vec![("s8", Service::default())]),
                expected: ServiceMap::new(),
            },
            // Key sets differ
            Variant {
                a: services(vec![("s9", Service::default()), ("s10", Service::default())]),
                b: services(vec![("s9", Service::default())]),
                expected: services(vec![("s10", Service::default())]),
            },
            // Identical node sets cancel out
            Variant {
                a: services(vec![(
                    "s11",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s11",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: ServiceMap::new(),
            },
            // Subset on B: only the missing host survives
            Variant {
                a: services(vec![(
                    "s12",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s12",
                    Service {
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s12",
                    Service {
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            // Scalar fields fall back to B's values when A's are empty
            Variant {
                a: services(vec![(
                    "s13",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s13",
                    Service {
                        aws_id: "id".to_string(),
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s13",
                    Service {
                        aws_id: "id".to_string(),
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            Variant {
                a: services(vec![(
                    "s14",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s14",
                    Service {
                        aws_namespace: "ns1".to_string(),
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s14",
                    Service {
                        aws_namespace: "ns1".to_string(),
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            Variant {
                a: services(vec![(
                    "s19",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s19",
                    Service {
                        consul_id: "id".to_string(),
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s19",
                    Service {
                        consul_id: "id".to_string(),
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            Variant {
                a: services(vec![(
                    "s20",
                    Service {
                        nodes: nodes(&[("h1", &[1]), ("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s20",
                    Service {
                        id: "id".to_string(),
                        name: "name".to_string(),
                        nodes: nodes(&[("h2", &[2])]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s20",
                    Service {
                        id: "id".to_string(),
                        name: "name".to_string(),
                        nodes: nodes(&[("h1", &[1])]),
                        ..Default::default()
                    },
                )]),
            },
            // Healths: key only in A survives, identical key cancels
            Variant {
                a: services(vec![(
                    "s16",
                    Service {
                        healths: healths(&[("h1", Health::Passing), ("h2", Health::Critical)]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s16",
                    Service {
                        healths: healths(&[("h1", Health::Passing)]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s16",
                    Service {
                        healths: healths(&[("h2", Health::Critical)]),
                        ..Default::default()
                    },
                )]),
            },
            // Healths: same key, differing value -> A's value carried
            Variant {
                a: services(vec![(
                    "s17",
                    Service {
                        healths: healths(&[("h1", Health::Passing)]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s17",
                    Service {
                        healths: healths(&[("h1", Health::Critical)]),
                        ..Default::default()
                    },
                )]),
                expected: services(vec![(
                    "s17",
                    Service {
                        healths: healths(&[("h1", Health::Passing)]),
                        ..Default::default()
                    },
                )]),
            },
            // Healths: identical maps cancel out
            Variant {
                a: services(vec![(
                    "s18",
                    Service {
                        healths: healths(&[("h1", Health::Passing), ("h2", Health::Critical)]),
                        ..Default::default()
                    },
                )]),
                b: services(vec![(
                    "s18",
                    Service {
                        healths: healths(&[("h2", Health::Critical), ("h1", Health::Passing)]),
                        ..Default::default()
                    },
                )]),
                expected: ServiceMap::new(),
            },
        ];

        for variant in table {
            assert_eq!(variant.expected, only_in_first(&variant.a, &variant.b));
        }
    }

    #[test]
    fn test_diff_nodes_asymmetric_ports() {
        // A has h1:{1,2}, h2:{3}; B has h1:{2}, h2:{3,4}.
        // Expected: h1:{1} - h2 fully subsumed, B's extra port invisible.
        let a = nodes(&[("h1", &[1, 2]), ("h2", &[3])]);
        let b = nodes(&[("h1", &[2]), ("h2", &[3, 4])]);
        assert_eq!(diff_nodes(&a, &b), nodes(&[("h1", &[1])]));
    }

    #[test]
    fn test_diff_nodes_empty_b() {
        let a = nodes(&[("h1", &[1])]);
        assert_eq!(diff_nodes(&a, &NodeMap::new()), a);
        assert_eq!(diff_nodes(&NodeMap::new(), &a), NodeMap::new());
    }

    #[test]
    fn test_diff_healths() {
        let a = healths(&[("n1", Health::Passing), ("n2", Health::Critical)]);
        let b = healths(&[("n1", Health::Critical), ("n2", Health::Critical)]);
        assert_eq!(diff_healths(&a, &b), healths(&[("n1", Health::Passing)]));
        assert_eq!(diff_healths(&a, &a), HealthMap::new());
    }

    #[test]
    fn test_only_in_first_no_identical_keys_returned() {
        // Every key in the result either is missing from B or carries deltas.
        let a = services(vec![
            (
                "same",
                Service {
                    nodes: nodes(&[("h1", &[1])]),
                    ..Default::default()
                },
            ),
            (
                "missing",
                Service {
                    nodes: nodes(&[("h9", &[9])]),
                    ..Default::default()
                },
            ),
        ]);
        let b = services(vec![(
            "same",
            Service {
                nodes: nodes(&[("h1", &[1])]),
                ..Default::default()
            },
        )]);

        let result = only_in_first(&a, &b);
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("missing"));
    }
}
