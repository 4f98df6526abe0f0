//! Helpers for container environment variables.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashMap, HashSet},
    sync::LazyLock,
};

use indexmap::IndexMap;
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, SecretKeySelector};
use regex::Regex;

static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\$+)\(([A-Za-z_][A-Za-z0-9_.\-]*)\)")
        .expect("failed to compile env reference regex")
});

pub fn env_value(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

pub fn env_from_field(name: impl Into<String>, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_owned(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
    }
}

pub fn env_from_secret(name: impl Into<String>, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_owned(),
                key: key.to_owned(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

/// Merges `incoming` into `base` by name. A replaced variable keeps its original position.
pub fn merge_env(base: Vec<EnvVar>, incoming: impl IntoIterator<Item = EnvVar>) -> Vec<EnvVar> {
    let mut merged: IndexMap<String, EnvVar> = base
        .into_iter()
        .map(|env| (env.name.clone(), env))
        .collect();
    for env in incoming {
        merged.insert(env.name.clone(), env);
    }
    merged.into_values().collect()
}

/// Names referenced as `$(NAME)` in `value`. `$$(NAME)` is an escaped literal and is skipped.
pub fn references(value: &str) -> HashSet<&str> {
    REFERENCE_REGEX
        .captures_iter(value)
        .filter(|caps| caps[1].len() % 2 == 1)
        .filter_map(|caps| caps.get(2).map(|name| name.as_str()))
        .collect()
}

/// Orders `env` so that every variable comes after the variables it references.
///
/// Variables that are free to go are emitted by name, which makes the output independent of the
/// input order. Variables caught in a reference cycle keep their input order at the end.
pub fn sort_by_dependency(env: &mut Vec<EnvVar>) {
    let index_by_name: HashMap<&str, usize> = env
        .iter()
        .enumerate()
        .map(|(idx, env)| (env.name.as_str(), idx))
        .collect();

    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut in_degree = vec![0_usize; env.len()];
    for (idx, var) in env.iter().enumerate() {
        let Some(value) = var.value.as_deref() else {
            continue;
        };
        for name in references(value) {
            match index_by_name.get(name) {
                Some(&dep) if dep != idx => {
                    dependents.entry(dep).or_default().push(idx);
                    in_degree[idx] += 1;
                }
                _ => {}
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<(&str, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| Reverse((env[idx].name.as_str(), idx)))
        .collect();

    let mut order = Vec::with_capacity(env.len());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(idx);
        for &child in dependents.get(&idx).into_iter().flatten() {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push(Reverse((env[child].name.as_str(), child)));
            }
        }
    }

    let emitted: HashSet<usize> = order.iter().copied().collect();
    order.extend((0..env.len()).filter(|idx| !emitted.contains(idx)));

    let mut slots: Vec<Option<EnvVar>> = std::mem::take(env).into_iter().map(Some).collect();
    env.extend(order.into_iter().filter_map(|idx| slots[idx].take()));
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn names(env: &[EnvVar]) -> Vec<&str> {
        env.iter().map(|e| e.name.as_str()).collect()
    }

    #[rstest]
    #[case("$(A)", &["A"])]
    #[case("$$(A)", &[])]
    #[case("$$$(A)", &["A"])]
    #[case("http://$(HOST):$(PORT)/x", &["HOST", "PORT"])]
    #[case("no refs", &[])]
    fn find_references(#[case] value: &str, #[case] expected: &[&str]) {
        let mut found: Vec<_> = references(value).into_iter().collect();
        found.sort_unstable();
        assert_eq!(found, expected);
    }

    #[test]
    fn dependencies_come_first() {
        let mut env = vec![
            env_value("RW_ADVERTISE_ADDR", "$(POD_NAME).rw-meta:5690"),
            env_value("RW_SQL_ENDPOINT", "postgres://$(PG_USER):$(PG_PASS)@pg"),
            env_from_secret("PG_USER", "pg", "username"),
            env_from_secret("PG_PASS", "pg", "password"),
            env_from_field("POD_NAME", "metadata.name"),
        ];

        sort_by_dependency(&mut env);

        assert_eq!(names(&env), [
            "PG_PASS",
            "PG_USER",
            "POD_NAME",
            "RW_ADVERTISE_ADDR",
            "RW_SQL_ENDPOINT"
        ]);
    }

    #[test]
    fn escaped_and_unknown_references_are_ignored() {
        let mut env = vec![
            env_value("B", "$$(A)"),
            env_value("A", "$(MISSING)"),
        ];

        sort_by_dependency(&mut env);

        assert_eq!(names(&env), ["A", "B"]);
    }

    #[test]
    fn cycles_keep_input_order() {
        let mut env = vec![
            env_value("Z", "plain"),
            env_value("B", "$(A)"),
            env_value("A", "$(B)"),
            env_value("C", "$(A)"),
        ];

        sort_by_dependency(&mut env);

        assert_eq!(names(&env), ["Z", "B", "A", "C"]);
    }

    #[test]
    fn sorting_is_independent_of_input_order() {
        let forward = vec![env_value("X", "$(Y)"), env_value("Y", "1"), env_value("W", "2")];
        let mut reversed: Vec<_> = forward.iter().rev().cloned().collect();
        let mut forward = forward;

        sort_by_dependency(&mut forward);
        sort_by_dependency(&mut reversed);

        assert_eq!(forward, reversed);
    }

    #[test]
    fn merge_replaces_in_place() {
        let merged = merge_env(
            vec![env_value("A", "1"), env_value("B", "2")],
            [env_value("A", "3"), env_value("C", "4")],
        );

        assert_eq!(names(&merged), ["A", "B", "C"]);
        assert_eq!(merged[0].value.as_deref(), Some("3"));
    }
}
