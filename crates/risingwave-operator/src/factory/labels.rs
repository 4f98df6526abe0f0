use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::{
    consts::{ANNOTATION_INHERIT_LABEL_PREFIX, LABEL_PREFIX},
    crd::RisingWave,
};

/// Labels of the RisingWave that every child carries, selected by the prefixes listed in the
/// inherit-label-prefix annotation. The operator's own prefix is never inherited.
pub fn inherited_labels(risingwave: &RisingWave) -> BTreeMap<String, String> {
    let Some(prefixes) = risingwave.annotations().get(ANNOTATION_INHERIT_LABEL_PREFIX) else {
        return BTreeMap::new();
    };
    let prefixes: Vec<String> = prefixes
        .split(',')
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty() && *prefix != LABEL_PREFIX)
        .map(|prefix| format!("{prefix}/"))
        .collect();

    risingwave
        .labels()
        .iter()
        .filter(|(key, _)| prefixes.iter().any(|prefix| key.starts_with(prefix.as_str())))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::crd::RisingWaveSpec;

    #[rstest]
    #[case(None, &[])]
    #[case(Some("team.io"), &["team.io/owner"])]
    #[case(Some(" team.io , cost.io,"), &["cost.io/center", "team.io/owner"])]
    #[case(Some("risingwave,team.io"), &["team.io/owner"])]
    #[case(Some("team"), &[])]
    fn inherit(#[case] annotation: Option<&str>, #[case] expected: &[&str]) {
        let mut rw = RisingWave::new("rw", RisingWaveSpec::default());
        rw.labels_mut().extend([
            ("team.io/owner".to_owned(), "db".to_owned()),
            ("cost.io/center".to_owned(), "42".to_owned()),
            ("risingwave/name".to_owned(), "rw".to_owned()),
            ("team".to_owned(), "x".to_owned()),
        ]);
        if let Some(annotation) = annotation {
            rw.annotations_mut()
                .insert(ANNOTATION_INHERIT_LABEL_PREFIX.to_owned(), annotation.to_owned());
        }

        let labels = inherited_labels(&rw);

        assert_eq!(labels.keys().map(String::as_str).collect::<Vec<_>>(), expected);
    }
}
