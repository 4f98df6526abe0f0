//! Access to the replicas of a single node group inside a [`RisingWaveSpec`].
//!
//! The default group (`""`) keeps its replicas under `spec.global.replicas`, every named group
//! under `spec.components.<component>.groups`.

use crate::crd::{Component, RisingWaveSpec, template::ComponentSpec};

/// The components a scale view can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalableComponent {
    Meta,
    Frontend,
    Compute,
    Compactor,
}

impl ScalableComponent {
    pub fn new(component: Component) -> Option<Self> {
        match component {
            Component::Meta => Some(Self::Meta),
            Component::Frontend => Some(Self::Frontend),
            Component::Compute => Some(Self::Compute),
            Component::Compactor => Some(Self::Compactor),
            Component::Connector | Component::Standalone | Component::Config => None,
        }
    }

    pub fn component(self) -> Component {
        match self {
            Self::Meta => Component::Meta,
            Self::Frontend => Component::Frontend,
            Self::Compute => Component::Compute,
            Self::Compactor => Component::Compactor,
        }
    }

    fn global_replicas(self, spec: &mut RisingWaveSpec) -> &mut i32 {
        let replicas = &mut spec.global.replicas;
        match self {
            Self::Meta => &mut replicas.meta,
            Self::Frontend => &mut replicas.frontend,
            Self::Compute => &mut replicas.compute,
            Self::Compactor => &mut replicas.compactor,
        }
    }

    fn groups(self, spec: &mut RisingWaveSpec) -> &mut ComponentSpec {
        let components = &mut spec.components;
        match self {
            Self::Meta => &mut components.meta,
            Self::Frontend => &mut components.frontend,
            Self::Compute => &mut components.compute,
            Self::Compactor => &mut components.compactor,
        }
    }
}

/// Named groups holding a replica count.
pub trait GroupReplicas {
    fn group_names(&self) -> Vec<String>;

    /// Position and replicas of `group`, `None` when it is not declared.
    fn group_replicas_mut(&mut self, group: &str) -> Option<(usize, &mut i32)>;
}

impl GroupReplicas for ComponentSpec {
    fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    fn group_replicas_mut(&mut self, group: &str) -> Option<(usize, &mut i32)> {
        self.groups
            .iter_mut()
            .enumerate()
            .find(|(_, g)| g.name == group)
            .map(|(index, g)| (index, &mut g.replicas))
    }
}

pub struct ScaleViewHelper<'a> {
    spec: &'a mut RisingWaveSpec,
    component: ScalableComponent,
}

impl<'a> ScaleViewHelper<'a> {
    pub fn new(spec: &'a mut RisingWaveSpec, component: ScalableComponent) -> Self {
        Self { spec, component }
    }

    fn replicas_mut(&mut self, group: &str) -> Option<(usize, &mut i32)> {
        if group.is_empty() {
            return Some((0, self.component.global_replicas(self.spec)));
        }
        self.component.groups(self.spec).group_replicas_mut(group)
    }

    /// Names of the groups under `spec.components`, without the default group.
    pub fn list_component_groups(&mut self) -> Vec<String> {
        self.component.groups(self.spec).group_names()
    }

    /// Index of `group` in `spec.components.<component>.groups`. The default group is at 0.
    pub fn group_index(&mut self, group: &str) -> Option<usize> {
        self.replicas_mut(group).map(|(index, _)| index)
    }

    pub fn read_replicas(&mut self, group: &str) -> Option<i32> {
        self.replicas_mut(group).map(|(_, replicas)| *replicas)
    }

    /// Sets the replicas of `group`. Returns whether the value changed, `None` when the group is
    /// not declared.
    pub fn write_replicas(&mut self, group: &str, replicas: i32) -> Option<bool> {
        let (_, current) = self.replicas_mut(group)?;
        if *current == replicas {
            return Some(false);
        }
        *current = replicas;
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    fn spec() -> RisingWaveSpec {
        serde_yaml::from_str(indoc! {"
            global:
              replicas:
                compute: 1
                frontend: 2
            components:
              compute:
                groups:
                - name: a
                  replicas: 3
                - name: b
                  replicas: 4
        "})
        .unwrap()
    }

    #[rstest]
    #[case(Component::Compute, Some(ScalableComponent::Compute))]
    #[case(Component::Meta, Some(ScalableComponent::Meta))]
    #[case(Component::Connector, None)]
    #[case(Component::Standalone, None)]
    fn scalable(#[case] component: Component, #[case] expected: Option<ScalableComponent>) {
        assert_eq!(ScalableComponent::new(component), expected);
        if let Some(scalable) = expected {
            assert_eq!(scalable.component(), component);
        }
    }

    #[test]
    fn lists_named_groups() {
        let mut spec = spec();
        let mut helper = ScaleViewHelper::new(&mut spec, ScalableComponent::Compute);
        assert_eq!(helper.list_component_groups(), ["a", "b"]);
        assert_eq!(helper.group_index("b"), Some(1));
        assert_eq!(helper.group_index(""), Some(0));
        assert_eq!(helper.group_index("c"), None);
    }

    #[rstest]
    #[case(ScalableComponent::Compute, "", Some(1))]
    #[case(ScalableComponent::Compute, "b", Some(4))]
    #[case(ScalableComponent::Frontend, "", Some(2))]
    #[case(ScalableComponent::Frontend, "a", None)]
    fn read(
        #[case] component: ScalableComponent,
        #[case] group: &str,
        #[case] expected: Option<i32>,
    ) {
        let mut spec = spec();
        assert_eq!(
            ScaleViewHelper::new(&mut spec, component).read_replicas(group),
            expected
        );
    }

    #[test]
    fn write_then_read() {
        let mut spec = spec();
        let mut helper = ScaleViewHelper::new(&mut spec, ScalableComponent::Compute);

        assert_eq!(helper.write_replicas("a", 5), Some(true));
        assert_eq!(helper.write_replicas("a", 5), Some(false));
        assert_eq!(helper.write_replicas("", 2), Some(true));
        assert_eq!(helper.write_replicas("missing", 1), None);
        assert_eq!(helper.read_replicas("a"), Some(5));

        assert_eq!(spec.global.replicas.compute, 2);
        assert_eq!(spec.components.compute.groups[0].replicas, 5);
    }
}
