use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Port the Prometheus endpoint listens on.
const METRICS_PORT: u16 = 9000;

/// Installs the global metrics recorder and serves it on `[::]:9000/metrics`.
///
/// Every series carries a `service` label when `service_name` is given.
pub fn init_metrics(service_name: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new().with_http_listener(SocketAddr::new(
        IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        METRICS_PORT,
    ));

    if let Some(service_name) = service_name {
        builder = builder.add_global_label("service", service_name);
    }

    builder.install()?;

    Ok(())
}
