//! Translation of the RisingWave upgrade strategy into the native strategy of each workload kind.

use k8s_openapi::{
    api::apps::v1::{
        DeploymentStrategy, RollingUpdateDeployment, RollingUpdateStatefulSetStrategy,
        StatefulSetUpdateStrategy,
    },
    apimachinery::pkg::util::intstr::IntOrString,
};

use super::{InvalidPartitionSnafu, Result};
use crate::crd::{
    external::kruise::{
        AdvancedStatefulSetRollingUpdate, AdvancedStatefulSetUpdateStrategy, CloneSetUpdateStrategy,
        InPlaceUpdateStrategy, PodUpdatePolicy,
    },
    template::{RollingUpdate, UpgradeStrategy, UpgradeStrategyType},
};

const ROLLING_UPDATE: &str = "RollingUpdate";
const RECREATE: &str = "Recreate";

/// Converts a partition to the integer form required by stateful sets. A percentage is read as
/// its number, so `50%` becomes `50`.
pub fn partition_as_int(partition: &IntOrString) -> Result<i32> {
    match partition {
        IntOrString::Int(value) => Ok(*value),
        IntOrString::String(value) => value
            .trim_end_matches('%')
            .parse()
            .ok()
            .ok_or_else(|| InvalidPartitionSnafu { value: value.clone() }.build()),
    }
}

fn rolling_update(strategy: &UpgradeStrategy) -> RollingUpdate {
    strategy.rolling_update.clone().unwrap_or_default()
}

fn int_partition(strategy: &UpgradeStrategy) -> Result<Option<i32>> {
    rolling_update(strategy)
        .partition
        .as_ref()
        .map(partition_as_int)
        .transpose()
}

fn pod_update_policy(type_: UpgradeStrategyType) -> PodUpdatePolicy {
    match type_ {
        UpgradeStrategyType::RollingUpdate | UpgradeStrategyType::Recreate => {
            PodUpdatePolicy::ReCreate
        }
        UpgradeStrategyType::InPlaceIfPossible => PodUpdatePolicy::InPlaceIfPossible,
        UpgradeStrategyType::InPlaceOnly => PodUpdatePolicy::InPlaceOnly,
    }
}

fn in_place_update_strategy(strategy: &UpgradeStrategy) -> Option<InPlaceUpdateStrategy> {
    strategy
        .in_place_grace_period_seconds
        .map(|grace_period_seconds| InPlaceUpdateStrategy {
            grace_period_seconds: Some(grace_period_seconds),
        })
}

/// In-place strategies cannot be expressed by deployments, they fall back to a rolling update.
pub fn deployment_strategy(strategy: Option<&UpgradeStrategy>) -> Option<DeploymentStrategy> {
    let strategy = strategy?;
    let rolling = rolling_update(strategy);

    Some(match strategy.type_ {
        UpgradeStrategyType::Recreate => DeploymentStrategy {
            type_: Some(RECREATE.to_owned()),
            rolling_update: None,
        },
        _ => DeploymentStrategy {
            type_: Some(ROLLING_UPDATE.to_owned()),
            rolling_update: Some(RollingUpdateDeployment {
                max_surge: rolling.max_surge,
                max_unavailable: rolling.max_unavailable,
            }),
        },
    })
}

/// Native stateful sets only roll, anything else keeps the platform default.
pub fn stateful_set_strategy(
    strategy: Option<&UpgradeStrategy>,
) -> Result<Option<StatefulSetUpdateStrategy>> {
    let Some(strategy) = strategy.filter(|s| s.type_ == UpgradeStrategyType::RollingUpdate) else {
        return Ok(None);
    };

    Ok(Some(StatefulSetUpdateStrategy {
        type_: Some(ROLLING_UPDATE.to_owned()),
        rolling_update: Some(RollingUpdateStatefulSetStrategy {
            max_unavailable: rolling_update(strategy).max_unavailable,
            partition: int_partition(strategy)?,
        }),
    }))
}

pub fn clone_set_strategy(strategy: Option<&UpgradeStrategy>) -> Option<CloneSetUpdateStrategy> {
    let strategy = strategy?;
    let rolling = rolling_update(strategy);

    Some(CloneSetUpdateStrategy {
        type_: Some(pod_update_policy(strategy.type_)),
        partition: rolling.partition,
        max_unavailable: rolling.max_unavailable,
        max_surge: rolling.max_surge,
        in_place_update_strategy: in_place_update_strategy(strategy),
    })
}

pub fn advanced_stateful_set_strategy(
    strategy: Option<&UpgradeStrategy>,
) -> Result<Option<AdvancedStatefulSetUpdateStrategy>> {
    let Some(strategy) = strategy else {
        return Ok(None);
    };

    Ok(Some(AdvancedStatefulSetUpdateStrategy {
        type_: Some(ROLLING_UPDATE.to_owned()),
        rolling_update: Some(AdvancedStatefulSetRollingUpdate {
            pod_update_policy: Some(pod_update_policy(strategy.type_)),
            partition: int_partition(strategy)?,
            max_unavailable: rolling_update(strategy).max_unavailable,
            in_place_update_strategy: in_place_update_strategy(strategy),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn strategy(type_: UpgradeStrategyType, partition: Option<IntOrString>) -> UpgradeStrategy {
        UpgradeStrategy {
            type_,
            rolling_update: Some(RollingUpdate {
                max_unavailable: Some(IntOrString::String("50%".to_owned())),
                partition,
                max_surge: None,
            }),
            in_place_grace_period_seconds: None,
        }
    }

    #[rstest]
    #[case(IntOrString::Int(3), Some(3))]
    #[case(IntOrString::String("50%".to_owned()), Some(50))]
    #[case(IntOrString::String("50".to_owned()), Some(50))]
    #[case(IntOrString::String("half".to_owned()), None)]
    fn partition(#[case] input: IntOrString, #[case] expected: Option<i32>) {
        assert_eq!(partition_as_int(&input).ok(), expected);
    }

    #[rstest]
    #[case(UpgradeStrategyType::RollingUpdate, "RollingUpdate")]
    #[case(UpgradeStrategyType::Recreate, "Recreate")]
    #[case(UpgradeStrategyType::InPlaceIfPossible, "RollingUpdate")]
    #[case(UpgradeStrategyType::InPlaceOnly, "RollingUpdate")]
    fn deployment(#[case] type_: UpgradeStrategyType, #[case] expected: &str) {
        let translated = deployment_strategy(Some(&strategy(type_, None))).unwrap();
        assert_eq!(translated.type_.as_deref(), Some(expected));
        assert_eq!(translated.rolling_update.is_some(), expected == "RollingUpdate");
        assert!(deployment_strategy(None).is_none());
    }

    #[test]
    fn stateful_set_only_rolls() {
        let recreate = strategy(UpgradeStrategyType::Recreate, None);
        assert_eq!(stateful_set_strategy(Some(&recreate)).unwrap(), None);

        let rolling = strategy(
            UpgradeStrategyType::RollingUpdate,
            Some(IntOrString::String("20%".to_owned())),
        );
        let translated = stateful_set_strategy(Some(&rolling)).unwrap().unwrap();
        assert_eq!(translated.rolling_update.unwrap().partition, Some(20));
    }

    #[test]
    fn invalid_partition_is_fatal() {
        let rolling = strategy(
            UpgradeStrategyType::InPlaceOnly,
            Some(IntOrString::String("x%".to_owned())),
        );
        let err = advanced_stateful_set_strategy(Some(&rolling)).unwrap_err();
        assert!(err.is_invalid_configuration());
    }

    #[rstest]
    #[case(UpgradeStrategyType::RollingUpdate, PodUpdatePolicy::ReCreate)]
    #[case(UpgradeStrategyType::Recreate, PodUpdatePolicy::ReCreate)]
    #[case(UpgradeStrategyType::InPlaceIfPossible, PodUpdatePolicy::InPlaceIfPossible)]
    #[case(UpgradeStrategyType::InPlaceOnly, PodUpdatePolicy::InPlaceOnly)]
    fn kruise_policies(#[case] type_: UpgradeStrategyType, #[case] expected: PodUpdatePolicy) {
        let mut upgrade = strategy(type_, Some(IntOrString::String("50%".to_owned())));
        upgrade.in_place_grace_period_seconds = Some(20);

        let clone_set = clone_set_strategy(Some(&upgrade)).unwrap();
        assert_eq!(clone_set.type_, Some(expected));
        assert_eq!(clone_set.partition, Some(IntOrString::String("50%".to_owned())));

        let sts = advanced_stateful_set_strategy(Some(&upgrade)).unwrap().unwrap();
        let rolling = sts.rolling_update.unwrap();
        assert_eq!(rolling.pod_update_policy, Some(expected));
        assert_eq!(rolling.partition, Some(50));
        assert_eq!(rolling.in_place_update_strategy.unwrap().grace_period_seconds, Some(20));
    }
}
