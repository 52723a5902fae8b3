//! Liveness and readiness probes.
//!
//! Precedence: HTTP check > Exec check > implicit TCP on the first
//! ServiceDiscovery port. A component with neither a health check nor a
//! port gets no probes.

use k8s_openapi::api::core::v1::{ExecAction, HTTPGetAction, Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use erda_common::crd::Component;

const DEFAULT_TIMEOUT_SECONDS: i32 = 10;
const DEFAULT_SUCCESS_THRESHOLD: i32 = 1;

const LIVENESS_INITIAL_DELAY_SECONDS: i32 = 1;
const LIVENESS_PERIOD_SECONDS: i32 = 15;
const LIVENESS_FAILURE_THRESHOLD: i32 = 9;

const READINESS_INITIAL_DELAY_SECONDS: i32 = 10;
const READINESS_PERIOD_SECONDS: i32 = 10;
const READINESS_FAILURE_THRESHOLD: i32 = 3;

// TCP probes keep one tuning regardless of liveness/readiness
const TCP_INITIAL_DELAY_SECONDS: i32 = LIVENESS_INITIAL_DELAY_SECONDS;
const TCP_PERIOD_SECONDS: i32 = LIVENESS_PERIOD_SECONDS;
const TCP_FAILURE_THRESHOLD: i32 = LIVENESS_FAILURE_THRESHOLD;

enum Handler {
    Http(HTTPGetAction),
    Exec(ExecAction),
    Tcp(TCPSocketAction),
}

/// Resolve the probe handler; HTTP wins over Exec, TCP is the fallback
/// when a port exists
fn handler(component: &Component) -> Option<Handler> {
    if let Some(check) = &component.health_check {
        if let Some(http) = &check.http_check {
            return Some(Handler::Http(HTTPGetAction {
                path: Some(http.path.clone()),
                port: IntOrString::Int(http.port),
                scheme: Some("HTTP".to_string()),
                ..Default::default()
            }));
        }
        if let Some(exec) = &check.exec_check {
            let mut command = vec!["/bin/sh".to_string(), "-c".to_string()];
            command.extend(exec.command.iter().cloned());
            return Some(Handler::Exec(ExecAction {
                command: Some(command),
            }));
        }
    }
    component.default_port().map(|port| {
        Handler::Tcp(TCPSocketAction {
            port: IntOrString::Int(port),
            host: None,
        })
    })
}

fn duration(component: &Component) -> i32 {
    component
        .health_check
        .as_ref()
        .map(|c| c.duration)
        .unwrap_or(0)
}

fn probe_with(
    handler: Handler,
    initial_delay: i32,
    period: i32,
    failure_threshold: i32,
) -> Probe {
    let mut probe = Probe {
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(DEFAULT_TIMEOUT_SECONDS),
        success_threshold: Some(DEFAULT_SUCCESS_THRESHOLD),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    };
    match handler {
        Handler::Http(h) => probe.http_get = Some(h),
        Handler::Exec(e) => probe.exec = Some(e),
        Handler::Tcp(t) => probe.tcp_socket = Some(t),
    }
    probe
}

/// Liveness probe: initialDelay 1s, period 15s, failureThreshold
/// max(9, duration/15)
pub fn liveness_probe(component: &Component) -> Option<Probe> {
    let handler = handler(component)?;
    if matches!(handler, Handler::Tcp(_)) {
        return Some(probe_with(
            handler,
            TCP_INITIAL_DELAY_SECONDS,
            TCP_PERIOD_SECONDS,
            TCP_FAILURE_THRESHOLD,
        ));
    }
    let failure_threshold =
        LIVENESS_FAILURE_THRESHOLD.max(duration(component) / LIVENESS_PERIOD_SECONDS);
    Some(probe_with(
        handler,
        LIVENESS_INITIAL_DELAY_SECONDS,
        LIVENESS_PERIOD_SECONDS,
        failure_threshold,
    ))
}

/// Readiness probe: initialDelay 10s, period 10s, failureThreshold
/// max(3, duration/10)
pub fn readiness_probe(component: &Component) -> Option<Probe> {
    let handler = handler(component)?;
    if matches!(handler, Handler::Tcp(_)) {
        return Some(probe_with(
            handler,
            TCP_INITIAL_DELAY_SECONDS,
            TCP_PERIOD_SECONDS,
            TCP_FAILURE_THRESHOLD,
        ));
    }
    let failure_threshold =
        READINESS_FAILURE_THRESHOLD.max(duration(component) / READINESS_PERIOD_SECONDS);
    Some(probe_with(
        handler,
        READINESS_INITIAL_DELAY_SECONDS,
        READINESS_PERIOD_SECONDS,
        failure_threshold,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use erda_common::crd::{ExecCheck, HealthCheck, HttpCheck, Network, ServiceDiscovery};

    fn component_with_check(check: Option<HealthCheck>, ports: Vec<i32>) -> Component {
        Component {
            name: "api".into(),
            health_check: check,
            network: Some(Network {
                service_discovery: ports
                    .into_iter()
                    .map(|port| ServiceDiscovery {
                        port,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Story: an HTTP check takes precedence over an Exec check
    #[test]
    fn story_http_beats_exec() {
        let component = component_with_check(
            Some(HealthCheck {
                duration: 0,
                http_check: Some(HttpCheck {
                    port: 8080,
                    path: "/health".into(),
                }),
                exec_check: Some(ExecCheck {
                    command: vec!["true".into()],
                }),
            }),
            vec![8080],
        );
        let probe = liveness_probe(&component).unwrap();
        assert!(probe.http_get.is_some());
        assert!(probe.exec.is_none());
        assert_eq!(
            probe.http_get.unwrap().path.as_deref(),
            Some("/health")
        );
    }

    /// Story: without an explicit check the first port gets a TCP probe
    #[test]
    fn story_tcp_fallback_on_first_port() {
        let component = component_with_check(None, vec![9090, 8080]);
        let probe = readiness_probe(&component).unwrap();
        let tcp = probe.tcp_socket.unwrap();
        assert_eq!(tcp.port, IntOrString::Int(9090));
        // TCP probes keep the TCP defaults even for readiness
        assert_eq!(probe.failure_threshold, Some(9));
        assert_eq!(probe.period_seconds, Some(15));
    }

    /// Story: no check and no ports means no probes at all
    #[test]
    fn story_no_check_no_ports_no_probe() {
        let component = Component {
            name: "batch".into(),
            ..Default::default()
        };
        assert!(liveness_probe(&component).is_none());
        assert!(readiness_probe(&component).is_none());
    }

    #[test]
    fn test_liveness_defaults() {
        let component = component_with_check(
            Some(HealthCheck {
                duration: 0,
                http_check: Some(HttpCheck {
                    port: 8080,
                    path: "/ping".into(),
                }),
                exec_check: None,
            }),
            vec![],
        );
        let probe = liveness_probe(&component).unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(1));
        assert_eq!(probe.period_seconds, Some(15));
        assert_eq!(probe.timeout_seconds, Some(10));
        assert_eq!(probe.success_threshold, Some(1));
        assert_eq!(probe.failure_threshold, Some(9));
    }

    #[test]
    fn test_duration_stretches_failure_threshold() {
        let component = component_with_check(
            Some(HealthCheck {
                duration: 300,
                http_check: Some(HttpCheck {
                    port: 8080,
                    path: "/ping".into(),
                }),
                exec_check: None,
            }),
            vec![],
        );
        // 300 / 15 = 20 liveness failures, 300 / 10 = 30 readiness failures
        assert_eq!(
            liveness_probe(&component).unwrap().failure_threshold,
            Some(20)
        );
        assert_eq!(
            readiness_probe(&component).unwrap().failure_threshold,
            Some(30)
        );
    }

    #[test]
    fn test_exec_check_wrapped_in_shell() {
        let component = component_with_check(
            Some(HealthCheck {
                duration: 0,
                http_check: None,
                exec_check: Some(ExecCheck {
                    command: vec!["pg_isready".into()],
                }),
            }),
            vec![],
        );
        let probe = readiness_probe(&component).unwrap();
        let command = probe.exec.unwrap().command.unwrap();
        assert_eq!(command[..2], ["/bin/sh".to_string(), "-c".to_string()]);
        assert_eq!(probe.initial_delay_seconds, Some(10));
        assert_eq!(probe.failure_threshold, Some(3));
    }
}
