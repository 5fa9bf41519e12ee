//! Field types, encoding, change tracking and the model registry.

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use dynamap_core::backend::BackendCall;
    use dynamap_core::{
        Delta, Engine, Entity, MapperConfig, MapperError, Number, Predicate, Registry,
        StorageBackend, Value, ValueSet,
    };
    use dynamap_model::{AttributeValue, Item};

    use crate::{engine, widget_model};

    fn widget(engine: &Engine, id: &str) -> Entity {
        engine.create("Widget").unwrap().with("id", id).unwrap()
    }

    fn raw(backend: &dyn StorageBackend, id: &str) -> Item {
        let key = Item::from([("id".to_owned(), AttributeValue::string(id))]);
        backend.get("Widget", &key).unwrap().unwrap()
    }

    #[test]
    fn test_should_apply_type_defaults() {
        let (engine, _) = engine();
        let w = widget(&engine, "w");
        assert_eq!(w.get("count"), Some(Value::from(0)));
        assert_eq!(w.get("enabled"), Some(Value::Bool(false)));
        assert_eq!(w.get("meta"), Some(Value::Structured(serde_json::json!({}))));
        assert_eq!(
            w.get("labels"),
            Some(Value::Set(ValueSet::strings(Vec::<String>::new())))
        );
        assert!(w.get("created").is_none());
        assert!(w.get("blob").is_none());
    }

    #[test]
    fn test_should_encode_every_field_type() {
        let (engine, backend) = engine();
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut w = widget(&engine, "w")
            .with("enabled", true)
            .unwrap()
            .with("meta", serde_json::json!({"color": "red"}))
            .unwrap()
            .with("created", created)
            .unwrap()
            .with("blob", vec![1_u8, 2, 3])
            .unwrap();
        w.add_to_set("labels", "x").unwrap();
        w.add_to_set("sizes", 2).unwrap();
        engine.save(&mut w).unwrap();

        let item = raw(backend.as_ref(), "w");
        assert_eq!(item["count"], AttributeValue::number(0));
        assert_eq!(item["enabled"], AttributeValue::string("true"));
        assert_eq!(item["meta"], AttributeValue::string(r#"{"color":"red"}"#));
        assert_eq!(item["created"], AttributeValue::number(1_700_000_000));
        assert_eq!(item["labels"], AttributeValue::Ss(vec!["x".to_owned()]));
        assert_eq!(item["sizes"], AttributeValue::Ns(vec!["2".to_owned()]));
        assert!(matches!(item["blob"], AttributeValue::B(ref b) if b.as_ref() == [1, 2, 3]));

        let loaded = engine
            .get("Widget", &[("id", "w".into())])
            .unwrap()
            .unwrap();
        assert_eq!(loaded, w);
        assert_eq!(loaded.get("created"), Some(Value::DateTime(created)));
    }

    #[test]
    fn test_should_keep_large_numbers_exact() {
        let (engine, _) = engine();
        let big = Value::Num(Number::parse("9007199254740993").unwrap());
        let mut counter = engine
            .create("Counter")
            .and_then(|c| c.with("id", big.clone()))
            .and_then(|c| c.with("n", big.clone()))
            .unwrap();
        engine.save(&mut counter).unwrap();

        let mut loaded = engine
            .get("Counter", &[("id", big.clone())])
            .unwrap()
            .unwrap();
        assert_eq!(loaded.get("n"), Some(big.clone()));
        assert_eq!(loaded.key().unwrap(), counter.key().unwrap());

        loaded.set("n", 1).unwrap();
        engine.sync(&mut loaded).unwrap();
        let stored = engine.get("Counter", &[("id", big)]).unwrap().unwrap();
        assert_eq!(stored.get("n"), Some(Value::from(1)));
    }

    #[test]
    fn test_should_coerce_only_when_allowed() {
        let (engine, _) = engine();
        let mut w = widget(&engine, "w");
        w.set("count", "42").unwrap();
        assert_eq!(w.get("count"), Some(Value::from(42)));
        assert!(matches!(
            w.set("enabled", "yes"),
            Err(MapperError::TypeMismatch { .. })
        ));
        engine.save(&mut w).unwrap();

        // query operands are always coerced to the field type
        let found = engine
            .scan("Widget")
            .unwrap()
            .filter(Predicate::gt("count", "40"))
            .count()
            .unwrap();
        assert_eq!(found, 1);
    }

    #[test]
    fn test_should_reject_values_failing_field_check() {
        let (engine, backend) = engine();
        let mut w = widget(&engine, "w");
        assert!(matches!(
            w.set("count", "-1"),
            Err(MapperError::CheckFailed { ref field, .. }) if field == "count"
        ));
        assert!(w.set("count", Number::try_from(2.5).unwrap()).is_err());
        assert_eq!(w.get("count"), Some(Value::from(0)));

        engine.save(&mut w).unwrap();
        assert_eq!(raw(backend.as_ref(), "w")["count"], AttributeValue::number(0));
    }

    #[test]
    fn test_should_collapse_add_then_remove() {
        let (engine, backend) = engine();
        let mut w = widget(&engine, "w");
        engine.save(&mut w).unwrap();
        backend.clear_calls();

        w.add_to_set("labels", "tmp").unwrap();
        w.remove_from_set("labels", "tmp").unwrap();
        assert!(w.diff().unwrap().is_empty());
        engine.sync(&mut w).unwrap();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_should_sync_set_deltas() {
        let (engine, backend) = engine();
        let mut w = widget(&engine, "w");
        w.add_to_set("labels", "a").unwrap();
        w.add_to_set("labels", "b").unwrap();
        engine.save(&mut w).unwrap();

        w.add_to_set("labels", "c").unwrap();
        w.remove_from_set("labels", "a").unwrap();
        assert_eq!(
            w.diff().unwrap()["labels"],
            Delta::Incremental {
                add: Some(ValueSet::strings(["c"])),
                remove: Some(ValueSet::strings(["a"])),
            }
        );
        backend.clear_calls();
        engine.sync(&mut w).unwrap();
        assert_eq!(
            backend.calls(),
            vec![BackendCall::Update {
                table: "Widget".to_owned()
            }]
        );

        let stored = engine
            .get("Widget", &[("id", "w".into())])
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("labels"), Some(Value::Set(ValueSet::strings(["b", "c"]))));

        w.remove_from_set("labels", "b").unwrap();
        w.remove_from_set("labels", "c").unwrap();
        engine.sync(&mut w).unwrap();
        assert!(!raw(backend.as_ref(), "w").contains_key("labels"));
    }

    #[test]
    fn test_should_replace_whole_set() {
        let (engine, _) = engine();
        let mut w = widget(&engine, "w");
        w.add_to_set("sizes", 1).unwrap();
        engine.save(&mut w).unwrap();

        w.set("sizes", ValueSet::numbers([7, 8])).unwrap();
        assert_eq!(
            w.diff().unwrap()["sizes"],
            Delta::Replace(Some(Value::Set(ValueSet::numbers([7, 8]))))
        );
        engine.sync(&mut w).unwrap();
        let stored = engine
            .get("Widget", &[("id", "w".into())])
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("sizes"), Some(Value::Set(ValueSet::numbers([7, 8]))));
    }

    #[test]
    fn test_should_sync_structured_and_unset_fields() {
        let (engine, backend) = engine();
        let mut w = widget(&engine, "w").with("blob", vec![9_u8]).unwrap();
        engine.save(&mut w).unwrap();

        w.structured_mut("meta").unwrap()["size"] = serde_json::json!(3);
        w.unset("blob").unwrap();
        engine.sync(&mut w).unwrap();

        let item = raw(backend.as_ref(), "w");
        assert_eq!(item["meta"], AttributeValue::string(r#"{"size":3}"#));
        assert!(!item.contains_key("blob"));
    }

    #[test]
    fn test_should_round_trip_extra_attributes() {
        let (engine, backend) = engine();
        let mut w = widget(&engine, "w");
        w.set_extra("nickname", "gizmo").unwrap();
        w.set_extra("visits", 3).unwrap();
        w.set_extra("history", serde_json::json!([1, 2])).unwrap();
        engine.save(&mut w).unwrap();

        let item = raw(backend.as_ref(), "w");
        assert_eq!(item["nickname"], AttributeValue::string(r#""gizmo""#));
        assert_eq!(item["visits"], AttributeValue::number(3));

        let loaded = engine
            .get("Widget", &[("id", "w".into())])
            .unwrap()
            .unwrap();
        assert_eq!(loaded.extra("nickname"), Some(&Value::from("gizmo")));
        assert_eq!(loaded.extra("visits"), Some(&Value::from(3)));
        assert_eq!(
            loaded.extra("history"),
            Some(&Value::Structured(serde_json::json!([1, 2])))
        );
        assert_eq!(loaded, w);

        let matching = |predicates: Vec<Predicate>| {
            engine
                .scan("Widget")
                .unwrap()
                .filter_all(predicates)
                .count()
                .unwrap()
        };
        assert_eq!(
            matching(vec![
                Predicate::eq("nickname", "gizmo"),
                Predicate::gte("visits", 3)
            ]),
            1
        );
        assert_eq!(matching(vec![Predicate::begins_with("nickname", "giz")]), 1);
        assert_eq!(matching(vec![Predicate::eq("nickname", "gadget")]), 0);
        assert_eq!(matching(vec![Predicate::gt("visits", 3)]), 0);
    }

    #[test]
    fn test_should_honor_overwrite_flag() {
        let (engine, _) = engine();
        engine.save(&mut widget(&engine, "w")).unwrap();
        assert!(matches!(
            engine.save_with(&mut widget(&engine, "w"), false),
            Err(MapperError::ConditionFailed { .. })
        ));
        engine
            .save(&mut widget(&engine, "w").with("count", 5).unwrap())
            .unwrap();
        let stored = engine
            .get("Widget", &[("id", "w".into())])
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("count"), Some(Value::from(5)));
    }

    #[test]
    fn test_should_install_global_registry_once() {
        let registry = Registry::new([widget_model()]).unwrap();
        Registry::install(registry).unwrap();
        assert!(matches!(
            Registry::install(Registry::default()),
            Err(MapperError::RegistryInitialized)
        ));

        let (_, backend) = engine();
        let global = Engine::from_global(backend, MapperConfig::default()).unwrap();
        assert_eq!(global.registry().model_names(), vec!["Widget"]);
        assert!(global.create("Widget").is_ok());
    }
}
