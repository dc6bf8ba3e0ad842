use crate::{objects::SharedCache, rules::SharedIndex};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use tokio::time::Instant;

#[derive(Debug)]
struct Instrumented {
    rules: SharedIndex,
    objects: SharedCache,
}

pub fn register(reg: &mut Registry, rules: SharedIndex, objects: SharedCache) {
    reg.register_collector(Box::new(Instrumented { rules, objects }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        {
            let rules = self.rules.read();

            let mut size_encoder = encoder.encode_descriptor(
                "rule_index_size",
                "The number of active rules by subject kind",
                None,
                MetricType::Gauge,
            )?;
            for (gk, len) in rules.kinds() {
                let labels = vec![("group", gk.group.as_str()), ("kind", gk.kind.as_str())];
                let size = ConstGauge::new(len as i64);
                size.encode(size_encoder.encode_family(&labels)?)?;
            }

            let invalid_encoder = encoder.encode_descriptor(
                "rule_index_invalid",
                "The number of rules that failed validation",
                None,
                MetricType::Gauge,
            )?;
            ConstGauge::new(rules.invalid_len() as i64).encode(invalid_encoder)?;
        }

        let objects = self.objects.read();
        let now = Instant::now();

        let mut size_encoder = encoder.encode_descriptor(
            "object_cache_size",
            "The number of cached dependency objects by kind",
            None,
            MetricType::Gauge,
        )?;
        for (gk, len) in objects.kinds() {
            let labels = vec![("group", gk.group.as_str()), ("kind", gk.kind.as_str())];
            let size = ConstGauge::new(len as i64);
            size.encode(size_encoder.encode_family(&labels)?)?;
        }

        let mut stale_encoder = encoder.encode_descriptor(
            "object_cache_stale",
            "Whether lookups for a dependency kind currently resolve as unavailable",
            None,
            MetricType::Gauge,
        )?;
        for (gk, _) in objects.kinds() {
            let labels = vec![("group", gk.group.as_str()), ("kind", gk.kind.as_str())];
            let stale = ConstGauge::new(objects.is_stale(gk, now) as i64);
            stale.encode(stale_encoder.encode_family(&labels)?)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{objects::Cache, rules::Index};
    use dependency_controller_core::GroupKind;
    use prometheus_client::encoding::text::encode;
    use tokio::{sync::mpsc, time::Duration};

    #[test]
    fn encodes_index_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let rules = Index::shared(tx);
        let objects = Cache::shared(Duration::from_secs(30), vec!["Ready".to_string()]);
        objects
            .write()
            .register(GroupKind::new("", "ConfigMap"), crate::objects::Scope::Namespaced);

        let mut reg = Registry::default();
        register(&mut reg, rules, objects);

        let mut out = String::new();
        encode(&mut out, &reg).expect("metrics must encode");
        assert!(out.contains("rule_index_invalid 0"), "{out}");
        assert!(
            out.contains(r#"object_cache_size{group="",kind="ConfigMap"} 0"#),
            "{out}"
        );
        assert!(
            out.contains(r#"object_cache_stale{group="",kind="ConfigMap"} 1"#),
            "{out}"
        );
    }
}
