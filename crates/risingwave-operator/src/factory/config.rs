use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::ObjectFactory;
use crate::{
    consts::{CONFIG_FILE_KEY, LABEL_RISINGWAVE_COMPONENT, LABEL_RISINGWAVE_NAME},
    crd::Component,
};

impl ObjectFactory<'_> {
    /// The config map holding `risingwave.toml`.
    ///
    /// Its content comes from the operator, not from the RisingWave spec, so it is marked as
    /// not synced with the generation.
    pub fn new_config_config_map(&self, raw: &str) -> ConfigMap {
        let labels = BTreeMap::from([
            (LABEL_RISINGWAVE_NAME.to_owned(), self.name.clone()),
            (LABEL_RISINGWAVE_COMPONENT.to_owned(), Component::Config.to_string()),
        ]);

        ConfigMap {
            metadata: self.object_meta(self.config_map_name(), self.object_labels(labels, false)),
            data: Some(BTreeMap::from([(CONFIG_FILE_KEY.to_owned(), raw.to_owned())])),
            ..ConfigMap::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::{
        consts::{LABEL_RISINGWAVE_GENERATION, NO_SYNC},
        factory::tests::{OPERATOR_VERSION, minimal},
    };

    #[test]
    fn config_map_is_not_synced() {
        let rw = minimal();
        let factory = ObjectFactory::new(&rw, OPERATOR_VERSION).unwrap();

        let cm = factory.new_config_config_map("[server]\n");

        assert_eq!(cm.name_any(), "rw-config");
        assert_eq!(cm.labels()[LABEL_RISINGWAVE_GENERATION], NO_SYNC);
        assert_eq!(cm.labels()[LABEL_RISINGWAVE_COMPONENT], "config");
        assert_eq!(cm.data.as_ref().unwrap()[CONFIG_FILE_KEY], "[server]\n");
        assert_eq!(cm.metadata.owner_references.as_ref().unwrap()[0].name, "rw");

        let mut newer = minimal();
        newer.metadata.generation = Some(4);
        let newer_factory = ObjectFactory::new(&newer, OPERATOR_VERSION).unwrap();
        assert!(newer_factory.is_up_to_date(&cm));
    }
}
