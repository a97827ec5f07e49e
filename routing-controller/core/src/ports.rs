use crate::k8s::ServicePort;

/// Port-name prefixes that mark a port as carrying HTTP traffic.
const HTTP_PROTOCOLS: [&str; 2] = ["http", "http2"];

/// Returns true if the port's name declares an HTTP-capable protocol.
///
/// Port names follow the `<protocol>[-<suffix>]` convention, so both `http`
/// and `http-web` qualify while `grpc-tcp` does not.
pub fn supports_http(port: &ServicePort) -> bool {
    let Some(name) = port.name.as_deref() else {
        return false;
    };
    let protocol = name.split('-').next().unwrap_or_default();
    HTTP_PROTOCOLS
        .iter()
        .any(|p| protocol.eq_ignore_ascii_case(p))
}

/// Returns true if the port's L4 protocol is TCP. Kubernetes defaults an
/// unset protocol to TCP.
pub fn is_tcp(port: &ServicePort) -> bool {
    port.protocol.as_deref().map_or(true, |p| p == "TCP")
}

/// The service port number, or zero if it is out of range.
pub fn port_number(port: &ServicePort) -> u32 {
    u32::try_from(port.port).unwrap_or_default()
}
