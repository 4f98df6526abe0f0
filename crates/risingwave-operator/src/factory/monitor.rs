use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use super::ObjectFactory;
use crate::{
    consts::{
        LABEL_RISINGWAVE_COMPONENT, LABEL_RISINGWAVE_GROUP, LABEL_RISINGWAVE_NAME, PORT_METRICS,
        SERVICE_MONITOR_INTERVAL, SERVICE_MONITOR_SCRAPE_TIMEOUT,
    },
    crd::external::monitoring::{Endpoint, ServiceMonitor, ServiceMonitorSpec},
};

impl ObjectFactory<'_> {
    /// Scrapes the metrics port of every service of the RisingWave.
    pub fn new_service_monitor(&self) -> ServiceMonitor {
        let labels = BTreeMap::from([(LABEL_RISINGWAVE_NAME.to_owned(), self.name.clone())]);

        ServiceMonitor {
            metadata: self.object_meta(
                self.service_monitor_name(),
                self.object_labels(labels.clone(), true),
            ),
            spec: ServiceMonitorSpec {
                job_label: Some(LABEL_RISINGWAVE_NAME.to_owned()),
                target_labels: vec![
                    LABEL_RISINGWAVE_NAME.to_owned(),
                    LABEL_RISINGWAVE_COMPONENT.to_owned(),
                    LABEL_RISINGWAVE_GROUP.to_owned(),
                ],
                endpoints: vec![Endpoint {
                    port: Some(PORT_METRICS.to_owned()),
                    interval: Some(SERVICE_MONITOR_INTERVAL.to_owned()),
                    scrape_timeout: Some(SERVICE_MONITOR_SCRAPE_TIMEOUT.to_owned()),
                }],
                selector: LabelSelector {
                    match_labels: Some(labels),
                    ..LabelSelector::default()
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::factory::tests::{OPERATOR_VERSION, minimal};

    #[test]
    fn service_monitor_targets() {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        let monitor = factory.new_service_monitor();

        assert_eq!(monitor.name_any(), "risingwave-rw");
        assert_eq!(monitor.owner_references()[0].kind, "RisingWave");
        assert_eq!(monitor.spec.target_labels, [
            "risingwave/name",
            "risingwave/component",
            "risingwave/group"
        ]);
        let endpoint = &monitor.spec.endpoints[0];
        assert_eq!(endpoint.port.as_deref(), Some("metrics"));
        assert_eq!(endpoint.interval.as_deref(), Some("5s"));
        assert_eq!(endpoint.scrape_timeout.as_deref(), Some("5s"));
    }
}
