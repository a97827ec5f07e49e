use crate::{
    k8s::{
        networking::{
            Destination, HttpMatchRequest, HttpRoute, HttpRouteDestination, L4MatchAttributes,
            PortSelector, RouteDestination, Subset, TcpRoute, VirtualServiceSpec,
        },
        servicemesh::{StrategyPolicy, StrategySpec},
        ServicePort,
    },
    ports::{is_tcp, port_number, supports_http},
};
use ahash::AHashSet as HashSet;

const FULL_WEIGHT: i32 = 100;

/// Computes the spec that should be applied for a service.
///
/// Without a strategy, or when the strategy is paused or still waiting for
/// one of its subsets to appear, the default spec routes every port to the
/// first subset. Otherwise the strategy's template drives the spec. A policy
/// this controller doesn't recognize is treated like `Immediately`.
///
/// Returns an empty spec if `subsets` is empty.
pub fn desired_spec(
    host: &str,
    ports: &[ServicePort],
    subsets: &[Subset],
    strategy: Option<&StrategySpec>,
) -> VirtualServiceSpec {
    let Some(primary) = subsets.first() else {
        return VirtualServiceSpec::default();
    };
    let default = || default_spec(host, &primary.name, ports);

    let Some(strategy) = strategy else {
        return default();
    };
    match strategy.strategy_policy {
        StrategyPolicy::Pause => default(),
        StrategyPolicy::WaitForWorkloadReady => {
            let available = subsets
                .iter()
                .map(|s| s.name.as_str())
                .collect::<HashSet<_>>();
            let missing = strategy
                .referenced_subsets()
                .into_iter()
                .filter(|subset| !available.contains(subset))
                .collect::<Vec<_>>();
            if missing.is_empty() {
                strategy_spec(strategy, host, ports)
            } else {
                tracing::debug!(?missing, "Strategy subsets are not ready");
                default()
            }
        }
        StrategyPolicy::Immediately | StrategyPolicy::Unspecified => {
            strategy_spec(strategy, host, ports)
        }
    }
}

/// Routes each TCP port entirely to `subset`: an HTTP route for ports named
/// with an HTTP protocol, a TCP route otherwise.
pub fn default_spec(host: &str, subset: &str, ports: &[ServicePort]) -> VirtualServiceSpec {
    let mut spec = VirtualServiceSpec {
        hosts: vec![host.to_string()],
        ..Default::default()
    };

    for port in ports.iter().filter(|p| is_tcp(p)) {
        let number = port_number(port);
        let destination = Destination {
            host: host.to_string(),
            subset: Some(subset.to_string()),
            port: Some(PortSelector { number }),
        };

        if supports_http(port) {
            spec.http.push(HttpRoute {
                name: port.name.clone(),
                matches: vec![http_match(number)],
                route: vec![HttpRouteDestination {
                    destination,
                    weight: FULL_WEIGHT,
                    headers: None,
                }],
                ..Default::default()
            });
        } else {
            spec.tcp.push(TcpRoute {
                matches: vec![l4_match(number)],
                route: vec![RouteDestination {
                    destination,
                    weight: FULL_WEIGHT,
                }],
            });
        }
    }

    spec
}

/// Builds a spec from the strategy's template.
///
/// The template's HTTP routes are replicated for every HTTP port and its TCP
/// routes for every other port, with each copy bound to its port. In
/// governor mode the template's destinations are ignored and each port is
/// routed entirely to the governing subset.
pub fn strategy_spec(
    strategy: &StrategySpec,
    host: &str,
    ports: &[ServicePort],
) -> VirtualServiceSpec {
    let template = &strategy.template.spec;
    let mut spec = VirtualServiceSpec {
        hosts: template.hosts.clone(),
        ..Default::default()
    };

    match strategy.governor() {
        None => {
            for port in ports {
                let number = port_number(port);
                if supports_http(port) {
                    spec.http
                        .extend(template.http.iter().map(|route| bind_http(route, number)));
                } else {
                    spec.tcp
                        .extend(template.tcp.iter().map(|route| bind_tcp(route, number)));
                }
            }
        }

        Some(subset) => {
            for port in ports {
                let number = port_number(port);
                let destination = Destination {
                    host: host.to_string(),
                    subset: Some(subset.to_string()),
                    port: None,
                };

                if supports_http(port) {
                    if !template.http.is_empty() {
                        spec.http.push(HttpRoute {
                            matches: vec![http_match(number)],
                            route: vec![HttpRouteDestination {
                                destination,
                                weight: FULL_WEIGHT,
                                headers: None,
                            }],
                            ..Default::default()
                        });
                    }
                } else if !template.tcp.is_empty() {
                    spec.tcp.push(TcpRoute {
                        matches: vec![l4_match(number)],
                        route: vec![RouteDestination {
                            destination: Destination {
                                port: Some(PortSelector { number }),
                                ..destination
                            },
                            weight: FULL_WEIGHT,
                        }],
                    });
                }
            }
        }
    }

    fill_destination_ports(&mut spec, ports);
    spec
}

/// Sets the port of every HTTP and TCP destination that has none: the port
/// the route matches on, or else the service's first port.
///
/// HTTP mirrors always take the service's first port, so every per-port copy
/// of a template route carries the same mirror.
pub fn fill_destination_ports(spec: &mut VirtualServiceSpec, ports: &[ServicePort]) {
    let Some(first) = ports.first().map(port_number) else {
        return;
    };

    for http in &mut spec.http {
        let number = http
            .matches
            .iter()
            .find_map(|m| m.port)
            .unwrap_or(first);
        for route in &mut http.route {
            fill_port(&mut route.destination, number);
        }
        if let Some(mirror) = http.mirror.as_mut() {
            fill_port(mirror, first);
        }
    }

    for tcp in &mut spec.tcp {
        let number = tcp
            .matches
            .iter()
            .find_map(|m| m.port)
            .unwrap_or(first);
        for route in &mut tcp.route {
            fill_port(&mut route.destination, number);
        }
    }
}

fn fill_port(dst: &mut Destination, number: u32) {
    if dst.port_number().is_none() {
        dst.port = Some(PortSelector { number });
    }
}

/// Copies a template route and binds the copy's matches and destinations to
/// `port`. The template itself is never modified.
fn bind_http(template: &HttpRoute, port: u32) -> HttpRoute {
    let mut route = template.clone();
    if route.matches.is_empty() {
        route.matches.push(http_match(port));
    } else {
        for m in &mut route.matches {
            m.port = Some(port);
        }
    }
    for dst in &mut route.route {
        dst.destination.port = Some(PortSelector { number: port });
    }
    route
}

fn bind_tcp(template: &TcpRoute, port: u32) -> TcpRoute {
    let mut route = template.clone();
    if route.matches.is_empty() {
        route.matches.push(l4_match(port));
    } else {
        for m in &mut route.matches {
            m.port = Some(port);
        }
    }
    for dst in &mut route.route {
        dst.destination.port = Some(PortSelector { number: port });
    }
    route
}

fn http_match(port: u32) -> HttpMatchRequest {
    HttpMatchRequest {
        port: Some(port),
        ..Default::default()
    }
}

fn l4_match(port: u32) -> L4MatchAttributes {
    L4MatchAttributes {
        port: Some(port),
        ..Default::default()
    }
}
