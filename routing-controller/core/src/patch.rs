use crate::k8s::networking::HttpRoute;
use ahash::AHashMap as HashMap;
use std::mem;

/// Carries operator-managed fields from previously applied HTTP routes onto
/// newly computed ones.
///
/// Each desired route whose name matches a prior route takes every field of
/// the prior route except its matches and destinations, which remain as
/// computed. Unnamed routes are never merged.
pub fn merge_http_routes(prior: &[HttpRoute], desired: &mut [HttpRoute]) {
    let by_name = prior
        .iter()
        .filter_map(|route| Some((route.name.as_deref()?, route)))
        .collect::<HashMap<_, _>>();
    if by_name.is_empty() {
        return;
    }

    for route in desired.iter_mut() {
        let Some(&prior) = route.name.as_deref().and_then(|name| by_name.get(name)) else {
            continue;
        };
        *route = HttpRoute {
            matches: mem::take(&mut route.matches),
            route: mem::take(&mut route.route),
            ..prior.clone()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::networking::{
        Destination, HttpMatchRequest, HttpRetry, HttpRouteDestination, PortSelector,
    };
    use pretty_assertions::assert_eq;

    fn mk_route(name: Option<&str>, port: u32, subset: &str) -> HttpRoute {
        HttpRoute {
            name: name.map(Into::into),
            matches: vec![HttpMatchRequest {
                port: Some(port),
                ..Default::default()
            }],
            route: vec![HttpRouteDestination {
                destination: Destination {
                    host: "reviews".to_string(),
                    subset: Some(subset.to_string()),
                    port: Some(PortSelector { number: port }),
                },
                weight: 100,
                headers: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn preserves_operator_fields() {
        let prior = {
            let mut route = mk_route(Some("primary"), 8080, "v1");
            route.timeout = Some("10s".to_string());
            route.retries = Some(HttpRetry {
                attempts: 3,
                per_try_timeout: Some("2s".to_string()),
                retry_on: None,
            });
            route.extensions.insert(
                "fault".to_string(),
                serde_json::json!({ "abort": { "httpStatus": 503 } }),
            );
            route
        };

        let mut desired = vec![mk_route(Some("primary"), 9080, "v2")];
        merge_http_routes(&[prior.clone()], &mut desired);

        let expected = HttpRoute {
            matches: mk_route(None, 9080, "v2").matches,
            route: mk_route(None, 9080, "v2").route,
            ..prior
        };
        assert_eq!(desired, vec![expected]);
    }

    #[test]
    fn unmatched_routes_are_unchanged() {
        let mut prior = mk_route(Some("primary"), 8080, "v1");
        prior.timeout = Some("10s".to_string());
        let mut unnamed_prior = mk_route(None, 8080, "v1");
        unnamed_prior.timeout = Some("1s".to_string());
        unnamed_prior.mirror = mk_route(None, 9080, "v1").route.pop().map(|r| r.destination);

        let mut unnamed = mk_route(None, 8080, "v2");
        unnamed.mirror = mk_route(None, 8080, "v3").route.pop().map(|r| r.destination);
        let mut desired = vec![mk_route(Some("secondary"), 8080, "v2"), unnamed];
        let expected = desired.clone();
        merge_http_routes(&[prior, unnamed_prior], &mut desired);
        assert_eq!(desired, expected);
    }
}
