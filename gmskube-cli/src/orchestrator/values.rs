//! Helm value overrides for install and upgrade.
//!
//! Later values win in helm, so the order is: platform globals, per-type
//! image settings, feature flags, augmentations, and finally whatever the
//! operator passed with `--set`, `--set-string` and `--values`.

use std::path::Path;

use super::facts::ClusterFacts;
use crate::helm::ValueArg;
use crate::instance::InstanceType;
use crate::settings::InstanceSettings;

/// Image settings for each component group the instance type ships.
/// Repositories are only pinned on install; an upgrade keeps them.
fn type_groups(
    instance_type: InstanceType,
    registry: &str,
    tag: &str,
    with_repositories: bool,
) -> Vec<ValueArg> {
    let mut values = Vec::new();

    if instance_type.includes(InstanceType::Ian) {
        if with_repositories {
            values.push(ValueArg::set("kafka.image.registry", registry));
        }
        values.push(ValueArg::set("kafka.image.tag", tag));
    }

    if instance_type.includes(InstanceType::Logging) {
        if with_repositories {
            values.push(ValueArg::set(
                "fluentd.image.repository",
                format!("{registry}/gms-common/logging-fluentd"),
            ));
        }
        values.extend([
            ValueArg::set("elasticsearch.image.tag", tag),
            ValueArg::set("elasticsearch.sysctlImage.tag", tag),
            ValueArg::set("elasticsearch.kibana.image.tag", tag),
            ValueArg::set("fluentd.image.tag", tag),
        ]);
    }

    if instance_type.includes(InstanceType::Keycloak) {
        if with_repositories {
            values.push(ValueArg::set(
                "keycloakx.image.repository",
                format!("{registry}/gms-common/keycloak"),
            ));
        }
        values.extend([
            ValueArg::set("keycloakx.image.tag", tag),
            ValueArg::set("postgresql.image.tag", tag),
        ]);
    }

    values
}

fn augmentations(settings: &InstanceSettings) -> impl Iterator<Item = ValueArg> + '_ {
    settings
        .augmentations
        .iter()
        .map(|name| ValueArg::set(&format!("augmentation.{name}.enabled"), true))
}

fn user_overrides(settings: &InstanceSettings) -> impl Iterator<Item = ValueArg> + '_ {
    let sets = settings.sets.iter().cloned().map(ValueArg::Set);
    let set_strings = settings.set_strings.iter().cloned().map(ValueArg::SetString);
    let files = settings.values.iter().cloned().map(ValueArg::ValuesFile);
    sets.chain(set_strings).chain(files)
}

pub fn install_values(
    settings: &InstanceSettings,
    instance_type: InstanceType,
    facts: &ClusterFacts,
) -> Vec<ValueArg> {
    let registry = settings.docker_registry.as_str();
    let tag = settings.tag();

    let mut values = vec![
        ValueArg::set("global.baseDomain", &facts.base_domain),
        ValueArg::set("global.basePort", &facts.ingress_port),
        ValueArg::set("global.imageRegistry", registry),
        ValueArg::set("global.imageTag", tag),
        ValueArg::set("global.user", &settings.user),
    ];
    values.extend(type_groups(instance_type, registry, tag, true));
    if settings.wallet_path.is_some() {
        values.push(ValueArg::set("global.oracleWalletOverride", true));
    }
    if facts.istio {
        values.push(ValueArg::set("global.istio", true));
    }
    values.extend(augmentations(settings));
    values.extend(user_overrides(settings));
    values
}

/// Chart defaults first, then the release's current values, so helm
/// merges the running configuration over the chart.
pub fn upgrade_values(
    settings: &InstanceSettings,
    instance_type: InstanceType,
    saved_values: &Path,
) -> Vec<ValueArg> {
    let tag = settings.tag();

    let mut values = vec![
        ValueArg::ValuesFile(settings.chart_values_file(instance_type)),
        ValueArg::ValuesFile(saved_values.to_path_buf()),
        ValueArg::set("global.user", &settings.user),
        ValueArg::set("global.imageTag", tag),
    ];
    values.extend(type_groups(
        instance_type,
        &settings.docker_registry,
        tag,
        false,
    ));
    values.extend(augmentations(settings));
    values.extend(user_overrides(settings));
    values
}
